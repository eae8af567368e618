#![no_std]
#![no_main]

use defmt::{info, unwrap};
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_rp::bind_interrupts;
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::{Driver, InterruptHandler};
use jt51_synth::bridge::DEFAULT_DEPTH;
use jt51_synth::descriptor::{Identity, FEATURES};
use jt51_synth::device::{compose, Resources, SynthPort, UsbDomain, UsbLink};
use jt51_synth::synth::{MidiMessage, Synth};
use static_cell::ConstStaticCell;
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => InterruptHandler<USB>;
});

// The RP2040 USB controller has no high-speed PHY.
const LINK: UsbLink = UsbLink {
    connect: true,
    full_speed_only: true,
};

static RESOURCES: ConstStaticCell<Resources<DEFAULT_DEPTH>> = ConstStaticCell::new(Resources::new());
static SYNTH_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn SWI_IRQ_1() {
    SYNTH_EXECUTOR.on_interrupt()
}

type MyUsbDriver = Driver<'static, USB>;
type MyUsbDomain = UsbDomain<'static, MyUsbDriver, DEFAULT_DEPTH>;
type MySynthPort = SynthPort<'static, DEFAULT_DEPTH>;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());

    // Create the driver, from the HAL.
    let driver = Driver::new(p.USB, Irqs);

    let (usb, port) = compose(driver, &Identity::JT51_SYNTH, LINK, FEATURES, RESOURCES.take());
    info!("midi-in: {}", FEATURES.midi_in);

    // Synthesis runs above the USB domain, on its own executor.
    interrupt::SWI_IRQ_1.set_priority(Priority::P2);
    let synth_spawner = SYNTH_EXECUTOR.start(interrupt::SWI_IRQ_1);
    unwrap!(synth_spawner.spawn(synth_task(port)));

    unwrap!(spawner.spawn(usb_task(usb)));
}

#[embassy_executor::task]
async fn usb_task(mut usb: MyUsbDomain) -> ! {
    usb.run().await
}

#[embassy_executor::task]
async fn synth_task(mut port: MySynthPort) -> ! {
    let mut synth = VoiceLog::default();
    port.run(&mut synth).await
}

/// Stand-in for the sound core: counts sounding notes and logs every event.
#[derive(Default)]
struct VoiceLog {
    sounding: u32,
}

impl Synth for VoiceLog {
    fn handle(&mut self, message: MidiMessage) {
        match message {
            MidiMessage::NoteOn { .. } => self.sounding += 1,
            MidiMessage::NoteOff { .. } => self.sounding = self.sounding.saturating_sub(1),
            _ => {}
        }
        info!("{} ({} sounding)", message, self.sounding);
    }
}
