//! Provisioning portal submissions

/// Named text fields from a submitted configuration form.
///
/// A missing field reads as `None`; an empty input reads as `Some("")`.
pub trait FormFields {
    fn field(&self, name: &str) -> Option<&str>;
}

impl<T: FormFields + ?Sized> FormFields for &T {
    fn field(&self, name: &str) -> Option<&str> {
        (**self).field(name)
    }
}
