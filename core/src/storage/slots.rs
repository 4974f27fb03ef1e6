//! Power-safe record store on NOR flash
//!
//! Two erase-aligned slots hold alternate generations of the settings record.
//! A write always goes to the slot that does not hold the newest valid
//! record, so an interrupted erase or program only ever damages the copy
//! being replaced.
//!
//! Slot layout:
//!
//! ```text
//! 0      4        8      10         12      16
//! | magic | seq LE | len LE | reserved | check | payload ... | 0xFF padding |
//! ```
//!
//! `check` is the first four bytes of SHA-1 over `seq || len || payload`.

use core::fmt;

use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};
use relay_hal::RecordStorage;

use crate::config::CONFIG_RECORD_MAX;
use crate::tls::LeafDigest;

const MAGIC: [u8; 4] = *b"RCF1";
const HEADER_LEN: usize = 16;
/// Header plus the largest record, rounded up for write sizes up to 64
const SCRATCH_LEN: usize = 576;
const MAX_ALIGN: usize = 64;

/// Where the two slots live, as offsets into the flash device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub first: u32,
    pub second: u32,
    pub slot_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError<E> {
    /// Flash driver failure
    Flash(E),
    /// Slots overlap, are misaligned, or do not fit the device
    Layout,
    /// Record larger than a slot can hold
    TooLarge,
}

impl<E: fmt::Debug> fmt::Display for StoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash(e) => write!(f, "flash error: {:?}", e),
            Self::Layout => write!(f, "invalid slot layout"),
            Self::TooLarge => write!(f, "record too large"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for StoreError<E> {}

/// A valid record found in a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Generation {
    slot: usize,
    seq: u32,
    len: usize,
}

/// Whether sequence `a` was written after `b`, allowing for wrap-around
fn newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

fn record_check(seq: u32, len: u16, payload: &[u8]) -> [u8; 4] {
    let mut digest = LeafDigest::new();
    digest.update(&seq.to_le_bytes());
    digest.update(&len.to_le_bytes());
    digest.update(payload);
    let fp = digest.finalize();
    let bytes = fp.as_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// [`RecordStorage`] over two flash slots
pub struct SlotStore<F> {
    flash: F,
    layout: SlotLayout,
    newest: Option<Option<Generation>>,
    scratch: [u8; SCRATCH_LEN],
}

impl<F: NorFlash> SlotStore<F> {
    pub fn new(flash: F, layout: SlotLayout) -> Result<Self, StoreError<F::Error>> {
        let SlotLayout {
            first,
            second,
            slot_size,
        } = layout;
        let erase = F::ERASE_SIZE as u32;
        let (low, high) = if first < second {
            (first, second)
        } else {
            (second, first)
        };
        let fits = high
            .checked_add(slot_size)
            .is_some_and(|end| end as usize <= flash.capacity());

        if !fits
            || low.saturating_add(slot_size) > high
            || first % erase != 0
            || second % erase != 0
            || slot_size % erase != 0
            || (slot_size as usize) < SCRATCH_LEN
            || MAX_ALIGN % F::WRITE_SIZE != 0
            || HEADER_LEN % F::READ_SIZE != 0
        {
            error!("Flash slot layout rejected");
            return Err(StoreError::Layout);
        }

        Ok(Self {
            flash,
            layout,
            newest: None,
            scratch: [0xFF; SCRATCH_LEN],
        })
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn slot_base(&self, slot: usize) -> u32 {
        if slot == 0 {
            self.layout.first
        } else {
            self.layout.second
        }
    }

    /// Validate one slot, leaving its record in `scratch` when valid
    async fn read_slot(&mut self, slot: usize) -> Result<Option<Generation>, StoreError<F::Error>> {
        let base = self.slot_base(slot);
        self.flash
            .read(base, &mut self.scratch[..HEADER_LEN])
            .await
            .map_err(StoreError::Flash)?;

        let header = &self.scratch[..HEADER_LEN];
        if header[..4] != MAGIC {
            return Ok(None);
        }
        let seq = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let len = u16::from_le_bytes([header[8], header[9]]);
        let check = [header[12], header[13], header[14], header[15]];
        if usize::from(len) > CONFIG_RECORD_MAX {
            warn!("Slot {} header claims {} bytes", slot, len);
            return Ok(None);
        }

        let padded = round_up(usize::from(len), F::READ_SIZE);
        self.flash
            .read(
                base + HEADER_LEN as u32,
                &mut self.scratch[HEADER_LEN..HEADER_LEN + padded],
            )
            .await
            .map_err(StoreError::Flash)?;

        let payload = &self.scratch[HEADER_LEN..HEADER_LEN + usize::from(len)];
        if record_check(seq, len, payload) != check {
            warn!("Slot {} failed its check, ignoring", slot);
            return Ok(None);
        }
        Ok(Some(Generation {
            slot,
            seq,
            len: usize::from(len),
        }))
    }

    async fn newest(&mut self) -> Result<Option<Generation>, StoreError<F::Error>> {
        if let Some(known) = self.newest {
            return Ok(known);
        }
        let a = self.read_slot(0).await?;
        let b = self.read_slot(1).await?;
        let newest = match (a, b) {
            (Some(a), Some(b)) if newer(b.seq, a.seq) => Some(b),
            (Some(a), _) => Some(a),
            (None, b) => b,
        };
        debug!("Newest settings slot: {:?}", newest.map(|g| g.slot));
        self.newest = Some(newest);
        Ok(newest)
    }

    async fn store(&mut self, record: &[u8]) -> Result<(), StoreError<F::Error>> {
        if record.len() > CONFIG_RECORD_MAX {
            return Err(StoreError::TooLarge);
        }
        let len = record.len() as u16;
        let (slot, seq) = match self.newest().await? {
            Some(current) => (1 - current.slot, current.seq.wrapping_add(1)),
            None => (0, 1),
        };

        let total = round_up(HEADER_LEN + record.len(), F::WRITE_SIZE);
        let buf = &mut self.scratch[..total];
        buf.fill(0xFF);
        buf[..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&seq.to_le_bytes());
        buf[8..10].copy_from_slice(&len.to_le_bytes());
        buf[10..12].copy_from_slice(&[0, 0]);
        buf[12..16].copy_from_slice(&record_check(seq, len, record));
        buf[HEADER_LEN..HEADER_LEN + record.len()].copy_from_slice(record);

        let base = self.slot_base(slot);
        // The cached answer is only trusted again once the write succeeded
        self.newest = None;
        self.flash
            .erase(base, base + self.layout.slot_size)
            .await
            .map_err(StoreError::Flash)?;
        self.flash
            .write(base, &self.scratch[..total])
            .await
            .map_err(StoreError::Flash)?;

        debug!("Wrote settings generation {} to slot {}", seq, slot);
        self.newest = Some(Some(Generation {
            slot,
            seq,
            len: record.len(),
        }));
        Ok(())
    }
}

impl<F: NorFlash> RecordStorage for SlotStore<F> {
    type Error = StoreError<F::Error>;

    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let Some(generation) = self.newest().await? else {
            return Ok(None);
        };
        if generation.len > buf.len() {
            return Err(StoreError::TooLarge);
        }
        // Scanning may have left the other slot in scratch
        if self.read_slot(generation.slot).await? != Some(generation) {
            self.newest = None;
            return Err(StoreError::Layout);
        }
        buf[..generation.len]
            .copy_from_slice(&self.scratch[HEADER_LEN..HEADER_LEN + generation.len]);
        Ok(Some(generation.len))
    }

    async fn write(&mut self, record: &[u8]) -> Result<(), Self::Error> {
        self.store(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_storage_async::nor_flash::{
        ErrorType, NorFlashError, NorFlashErrorKind, ReadNorFlash,
    };
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const ERASE: usize = 1024;
    const LAYOUT: SlotLayout = SlotLayout {
        first: 0,
        second: ERASE as u32,
        slot_size: ERASE as u32,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct FlashFault;

    impl NorFlashError for FlashFault {
        fn kind(&self) -> NorFlashErrorKind {
            NorFlashErrorKind::Other
        }
    }

    /// NOR flash whose contents survive "power loss" (dropping the store)
    #[derive(Clone)]
    struct MockFlash {
        cells: Rc<RefCell<Vec<u8>>>,
        /// Bytes that may still be programmed before the power goes out
        power_budget: Rc<Cell<Option<usize>>>,
    }

    impl MockFlash {
        fn new(size: usize) -> Self {
            Self {
                cells: Rc::new(RefCell::new(vec![0xFF; size])),
                power_budget: Rc::new(Cell::new(None)),
            }
        }

        fn cut_power_after(&self, bytes: usize) {
            self.power_budget.set(Some(bytes));
        }

        fn restore_power(&self) {
            self.power_budget.set(None);
        }

        fn corrupt(&self, offset: usize) {
            self.cells.borrow_mut()[offset] ^= 0x5A;
        }
    }

    impl ErrorType for MockFlash {
        type Error = FlashFault;
    }

    impl ReadNorFlash for MockFlash {
        const READ_SIZE: usize = 1;

        async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let cells = self.cells.borrow();
            let start = offset as usize;
            bytes.copy_from_slice(&cells[start..start + bytes.len()]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.cells.borrow().len()
        }
    }

    impl NorFlash for MockFlash {
        const WRITE_SIZE: usize = 4;
        const ERASE_SIZE: usize = ERASE;

        async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            if self.power_budget.get() == Some(0) {
                return Err(FlashFault);
            }
            self.cells.borrow_mut()[from as usize..to as usize].fill(0xFF);
            Ok(())
        }

        async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            assert_eq!(offset as usize % Self::WRITE_SIZE, 0);
            assert_eq!(bytes.len() % Self::WRITE_SIZE, 0);
            let allowed = self.power_budget.get().unwrap_or(bytes.len()).min(bytes.len());
            let mut cells = self.cells.borrow_mut();
            for (i, b) in bytes[..allowed].iter().enumerate() {
                // NOR programming only clears bits
                cells[offset as usize + i] &= *b;
            }
            if allowed < bytes.len() {
                self.power_budget.set(Some(0));
                return Err(FlashFault);
            }
            Ok(())
        }
    }

    /// Same cells, read in units of `R` bytes
    struct ReadUnit<const R: usize>(MockFlash);

    impl<const R: usize> ErrorType for ReadUnit<R> {
        type Error = FlashFault;
    }

    impl<const R: usize> ReadNorFlash for ReadUnit<R> {
        const READ_SIZE: usize = R;

        async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            assert_eq!(offset as usize % R, 0);
            assert_eq!(bytes.len() % R, 0);
            self.0.read(offset, bytes).await
        }

        fn capacity(&self) -> usize {
            self.0.capacity()
        }
    }

    impl<const R: usize> NorFlash for ReadUnit<R> {
        const WRITE_SIZE: usize = MockFlash::WRITE_SIZE;
        const ERASE_SIZE: usize = ERASE;

        async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            self.0.erase(from, to).await
        }

        async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            self.0.write(offset, bytes).await
        }
    }

    fn read_record(flash: &MockFlash) -> Option<Vec<u8>> {
        let mut store = SlotStore::new(flash.clone(), LAYOUT).unwrap();
        let mut buf = [0u8; CONFIG_RECORD_MAX];
        block_on(store.read(&mut buf))
            .unwrap()
            .map(|len| buf[..len].to_vec())
    }

    #[test]
    fn test_empty_flash_has_no_record() {
        let flash = MockFlash::new(2 * ERASE);
        assert_eq!(read_record(&flash), None);
    }

    #[test]
    fn test_write_then_read_across_reboot() {
        let flash = MockFlash::new(2 * ERASE);
        let mut store = SlotStore::new(flash.clone(), LAYOUT).unwrap();
        block_on(store.write(br#"{"version":"1001"}"#)).unwrap();
        block_on(store.write(br#"{"version":"1001","ssid":"barn"}"#)).unwrap();
        block_on(store.write(b"odd")).unwrap();
        drop(store);

        assert_eq!(read_record(&flash).as_deref(), Some(&b"odd"[..]));
    }

    #[test]
    fn test_writes_alternate_slots() {
        let flash = MockFlash::new(2 * ERASE);
        let mut store = SlotStore::new(flash.clone(), LAYOUT).unwrap();
        block_on(store.write(b"first")).unwrap();
        block_on(store.write(b"second")).unwrap();

        let cells = flash.cells.borrow();
        assert_eq!(&cells[..4], b"RCF1");
        assert_eq!(&cells[HEADER_LEN..HEADER_LEN + 5], b"first");
        assert_eq!(&cells[ERASE..ERASE + 4], b"RCF1");
        assert_eq!(&cells[ERASE + HEADER_LEN..ERASE + HEADER_LEN + 6], b"second");
    }

    #[test]
    fn test_power_loss_mid_write_keeps_previous_record() {
        for cut in [0, 3, 10, HEADER_LEN, HEADER_LEN + 7] {
            let flash = MockFlash::new(2 * ERASE);
            let mut store = SlotStore::new(flash.clone(), LAYOUT).unwrap();
            block_on(store.write(b"old settings")).unwrap();
            block_on(store.write(b"current settings")).unwrap();

            flash.cut_power_after(cut);
            assert!(block_on(store.write(b"replacement settings")).is_err());
            drop(store);
            flash.restore_power();

            assert_eq!(
                read_record(&flash).as_deref(),
                Some(&b"current settings"[..]),
                "cut after {} bytes",
                cut
            );
        }
    }

    #[test]
    fn test_power_loss_on_first_write_leaves_nothing() {
        let flash = MockFlash::new(2 * ERASE);
        let mut store = SlotStore::new(flash.clone(), LAYOUT).unwrap();
        flash.cut_power_after(12);
        assert!(block_on(store.write(b"first settings")).is_err());
        flash.restore_power();
        assert_eq!(read_record(&flash), None);
    }

    #[test]
    fn test_corrupt_newest_falls_back() {
        let flash = MockFlash::new(2 * ERASE);
        let mut store = SlotStore::new(flash.clone(), LAYOUT).unwrap();
        block_on(store.write(b"older")).unwrap();
        block_on(store.write(b"newer")).unwrap();
        drop(store);

        flash.corrupt(ERASE + HEADER_LEN + 1);
        assert_eq!(read_record(&flash).as_deref(), Some(&b"older"[..]));
    }

    #[test]
    fn test_sequence_wraps() {
        assert!(newer(1, 0));
        assert!(newer(0, u32::MAX));
        assert!(!newer(u32::MAX, 0));
        assert!(!newer(5, 5));
    }

    #[test]
    fn test_oversized_record_rejected() {
        let flash = MockFlash::new(2 * ERASE);
        let mut store = SlotStore::new(flash, LAYOUT).unwrap();
        let record = [b'x'; CONFIG_RECORD_MAX + 1];
        assert_eq!(block_on(store.write(&record)), Err(StoreError::TooLarge));
    }

    #[test]
    fn test_layout_validation() {
        let flash = MockFlash::new(2 * ERASE);
        let overlapping = SlotLayout {
            first: 0,
            second: 512,
            slot_size: ERASE as u32,
        };
        assert!(matches!(
            SlotStore::new(flash.clone(), overlapping),
            Err(StoreError::Layout)
        ));

        let too_big = SlotLayout {
            first: 0,
            second: ERASE as u32,
            slot_size: 2 * ERASE as u32,
        };
        assert!(matches!(
            SlotStore::new(flash, too_big),
            Err(StoreError::Layout)
        ));
    }

    #[test]
    fn test_read_unit_must_divide_header() {
        let flash = MockFlash::new(2 * ERASE);
        let mut store = SlotStore::new(ReadUnit::<16>(flash.clone()), LAYOUT).unwrap();
        block_on(store.write(b"seven b")).unwrap();
        let mut buf = [0u8; CONFIG_RECORD_MAX];
        assert_eq!(block_on(store.read(&mut buf)), Ok(Some(7)));
        assert_eq!(&buf[..7], b"seven b");

        // Payload would start mid-unit
        assert!(matches!(
            SlotStore::new(ReadUnit::<32>(flash.clone()), LAYOUT),
            Err(StoreError::Layout)
        ));
        assert!(matches!(
            SlotStore::new(ReadUnit::<64>(flash), LAYOUT),
            Err(StoreError::Layout)
        ));
    }

    #[test]
    fn test_settings_over_slots() {
        use crate::storage::Settings;
        use crate::testing::operable_config;

        let flash = MockFlash::new(2 * ERASE);
        let store = SlotStore::new(flash.clone(), LAYOUT).unwrap();
        let mut settings = block_on(Settings::load(store));
        block_on(settings.apply_submission(&crate::testing::FormMap::new(&[
            ("ssid", "workshop"),
            ("pass", "hunter22"),
            ("host", "10.0.0.5"),
            ("token", "Zr8qTmuA"),
        ])))
        .unwrap();
        drop(settings);

        let store = SlotStore::new(flash, LAYOUT).unwrap();
        let settings = block_on(Settings::load(store));
        assert_eq!(settings.config(), &operable_config());
    }
}
