#![deny(unsafe_code)]
#![no_main]
#![no_std]

use core::sync::atomic::AtomicBool;

use defmt_rtt as _; // global logger
use panic_probe as _;
use relay_core::TriggerSlot;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod clock;
mod device;
mod device_id;
mod eth;
mod flash;
mod network;
mod tls_buffers;

stm32_tim2_monotonic!(Mono, 1_000_000);

/// Requests from the trigger button, drained by the mode controller
static TRIGGER: TriggerSlot = TriggerSlot::new();

/// Set while the controller is in provisioning; drives the LED pattern
static PROVISIONING: AtomicBool = AtomicBool::new(false);

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2, USART3])]
mod app {
    use super::*;
    use core::sync::atomic::Ordering;
    use defmt::{error, info};
    use embassy_futures::join::join3;
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::gpio::{Level, Output, Pull, Speed};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode};
    use embassy_stm32::rng::Rng;
    use embassy_stm32::time::Hertz;
    use relay_core::{ModeController, ModeTimings, Settings};

    use crate::clock::MonoClock;
    use crate::network::NetworkConfig;

    // RNG interrupt binding for hardware random number generator
    embassy_stm32::bind_interrupts!(struct RngIrqs {
        RNG => embassy_stm32::rng::InterruptHandler<peripherals::RNG>;
    });

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
        trigger: ExtiInput<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Relay firmware starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        // VCO / DIVQ(7) = 48 MHz (RNG clock)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);
        info!("PLL configured: SYSCLK=84MHz, PLLQ=48MHz for RNG");

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        Mono::start(84_000_000);

        let led = Output::new(p.PC1, Level::High, Speed::Low);
        // Provisioning button on D11 (PC7), active high
        let trigger = ExtiInput::new(p.PC7, p.EXTI7, Pull::Down);

        let w5500 = eth::W5500Pins {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
            int: p.PC2,
            exti: p.EXTI2,
            dma_tx: p.DMA1_CH4,
            dma_rx: p.DMA1_CH3,
        };

        indicator::spawn().ok();
        trigger_watch::spawn().ok();
        device_task::spawn(w5500, p.RNG, p.FLASH).ok();

        (Shared {}, Local { led, trigger })
    }

    /// Turns button presses into provisioning requests
    #[task(priority = 2, local = [trigger])]
    async fn trigger_watch(cx: trigger_watch::Context) {
        loop {
            cx.local.trigger.wait_for_rising_edge().await;
            TRIGGER.on_trigger_asserted();
        }
    }

    /// Heartbeat while operating, fast blink while provisioning
    #[task(priority = 1, local = [led])]
    async fn indicator(cx: indicator::Context) {
        loop {
            if PROVISIONING.load(Ordering::Relaxed) {
                cx.local.led.toggle();
                Mono::delay(150.millis()).await;
            } else {
                cx.local.led.set_high();
                Mono::delay(100.millis()).await;
                cx.local.led.set_low();
                Mono::delay(4900.millis()).await;
            }
        }
    }

    /// Settings, mode controller and the network stack.
    ///
    /// Stack is !Send and must remain within this task.
    #[task(priority = 1)]
    async fn device_task(
        _cx: device_task::Context,
        w5500: eth::W5500Pins,
        rng_periph: embassy_stm32::Peri<'static, peripherals::RNG>,
        flash_periph: embassy_stm32::Peri<'static, peripherals::FLASH>,
    ) {
        use embassy_net::{Config, StackResources};
        use static_cell::StaticCell;

        let store = match flash::settings_store(flash_periph) {
            Ok(store) => store,
            Err(e) => {
                error!("Settings store unavailable: {}", e);
                return;
            }
        };
        let mut settings = Settings::load(store).await;
        let mut controller =
            ModeController::boot(&TRIGGER, MonoClock, ModeTimings::default(), &settings);
        info!("Boot mode: {}", controller.mode());

        let net_config = NetworkConfig::default();
        let (eth_device, w5500_runner) = match eth::start(w5500, net_config.mac_addr).await {
            Ok(parts) => parts,
            Err(e) => {
                error!("Ethernet unavailable: {}", e);
                return;
            }
        };

        static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
        let (stack, mut net_runner) = embassy_net::new(
            eth_device,
            Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            net_config.seed,
        );
        info!("Network stack initialized with DHCP");

        let rng = Rng::new(rng_periph, RngIrqs);
        let app_logic = device::run(
            stack,
            rng,
            net_config.dhcp_timeout_ms,
            &mut settings,
            &mut controller,
        );

        join3(w5500_runner.run(), net_runner.run(), app_logic).await;
    }

    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
}
