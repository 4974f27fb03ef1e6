#![deny(unsafe_code)]
//! Settings record storage in internal flash
//!
//! The last two 128 KB sectors (10 and 11) are reserved in `memory.x` and
//! hold the two record slots. Offsets are relative to the flash base.

use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_stm32::flash::{Blocking, Error as FlashError, Flash};
use embassy_stm32::peripherals::FLASH;
use embassy_stm32::Peri;
use relay_core::storage::StoreError;
use relay_core::{SlotLayout, SlotStore};

/// Record store handed to `Settings`
pub type SettingsStore = SlotStore<BlockingAsync<Flash<'static, Blocking>>>;

/// Sector 10 (0x080C_0000) and sector 11 (0x080E_0000)
pub const SETTINGS_LAYOUT: SlotLayout = SlotLayout {
    first: 0x000C_0000,
    second: 0x000E_0000,
    slot_size: 0x0002_0000,
};

/// Open the settings store on the reserved sectors
pub fn settings_store(
    flash: Peri<'static, FLASH>,
) -> Result<SettingsStore, StoreError<FlashError>> {
    let flash = BlockingAsync::new(Flash::new_blocking(flash));
    SlotStore::new(flash, SETTINGS_LAYOUT)
}
