#![deny(unsafe_code)]
//! W5500 Ethernet FeatherWing on SPI2
//!
//! Wiring: SCK PB13, MOSI PB15, MISO PB14, CS PC6, RST PC3, INT PC2 (EXTI2),
//! with DMA1 streams 4/3 for TX/RX.

use defmt::{error, info, Debug2Format};
use embassy_embedded_hal::shared_bus::asynch::spi::SpiDevice;
use embassy_net_wiznet::chip::W5500;
use embassy_net_wiznet::{Device, Runner, State};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::mode::Async;
use embassy_stm32::peripherals::{DMA1_CH3, DMA1_CH4, EXTI2, PB13, PB14, PB15, PC2, PC3, PC6, SPI2};
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_stm32::Peri;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::delay::DelayNs;
use static_cell::StaticCell;

use crate::clock::MonoDelay;
use crate::network::NetworkError;

type SpiBus = Mutex<CriticalSectionRawMutex, Spi<'static, Async>>;
type W5500Spi = SpiDevice<'static, CriticalSectionRawMutex, Spi<'static, Async>, Output<'static>>;

/// W5500 driver runner; must be polled continuously
pub type W5500Runner = Runner<'static, W5500, W5500Spi, ExtiInput<'static>, Output<'static>>;

/// W5500 SPI clock
const SPI_FREQUENCY: Hertz = Hertz(10_000_000);

/// Peripherals wired to the FeatherWing
pub struct W5500Pins {
    pub spi: Peri<'static, SPI2>,
    pub sck: Peri<'static, PB13>,
    pub mosi: Peri<'static, PB15>,
    pub miso: Peri<'static, PB14>,
    pub cs: Peri<'static, PC6>,
    pub reset: Peri<'static, PC3>,
    pub int: Peri<'static, PC2>,
    pub exti: Peri<'static, EXTI2>,
    pub dma_tx: Peri<'static, DMA1_CH4>,
    pub dma_rx: Peri<'static, DMA1_CH3>,
}

/// Reset the chip and bring up the driver.
///
/// Returns the embassy-net device and the runner that services it. Must be
/// called once.
pub async fn start(
    pins: W5500Pins,
    mac_addr: [u8; 6],
) -> Result<(Device<'static>, W5500Runner), NetworkError> {
    let mut spi_config = spi::Config::default();
    spi_config.frequency = SPI_FREQUENCY;
    let spi = Spi::new(
        pins.spi,
        pins.sck,
        pins.mosi,
        pins.miso,
        pins.dma_tx,
        pins.dma_rx,
        spi_config,
    );

    let cs = Output::new(pins.cs, Level::High, Speed::VeryHigh);
    let int = ExtiInput::new(pins.int, pins.exti, Pull::Up);

    // RST low for at least 500 us, then 1 ms before the PLL locks
    let mut reset = Output::new(pins.reset, Level::Low, Speed::Low);
    let mut delay = MonoDelay;
    delay.delay_ms(1).await;
    reset.set_high();
    delay.delay_ms(2).await;

    static SPI_BUS: StaticCell<SpiBus> = StaticCell::new();
    let spi_bus = SPI_BUS.init(Mutex::new(spi));

    static STATE: StaticCell<State<8, 8>> = StaticCell::new();
    let state = STATE.init(State::new());

    info!(
        "W5500 MAC {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac_addr[0], mac_addr[1], mac_addr[2], mac_addr[3], mac_addr[4], mac_addr[5]
    );

    embassy_net_wiznet::new(mac_addr, state, SpiDevice::new(spi_bus, cs), int, reset)
        .await
        .map_err(|e| {
            error!("W5500 init failed: {:?}", Debug2Format(&e));
            NetworkError::EthernetInit
        })
}
