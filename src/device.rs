//! Device composition.
//!
//! [`compose`] wires the device stack, the MIDI-streaming class with its
//! control gate, and both stream bridges out of one [`Resources`] block, and
//! hands back one half per execution domain.

use core::future::pending;

use embassy_futures::join::join;
use embassy_usb::driver::Driver;
use embassy_usb::{Builder, UsbDevice};

use crate::bridge::{Bridge, BridgeReader, BridgeWriter, Overrun};
use crate::descriptor::{DescriptorSet, Features, Identity, Speed};
use crate::midi::{MidiReceiver, MidiSender, MidiStreaming, State};
use crate::synth::{run_synth, EventPacket, MidiMessage, Synth};

pub const CONFIG_DESCRIPTOR_LEN: usize = 256;
pub const BOS_DESCRIPTOR_LEN: usize = 64;
pub const MSOS_DESCRIPTOR_LEN: usize = 64;
pub const CONTROL_BUF_LEN: usize = 64;

/// Board-level link controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbLink {
    /// Attach to the bus at all.
    pub connect: bool,
    /// Never negotiate high speed.
    pub full_speed_only: bool,
}

impl UsbLink {
    pub const fn speed(&self) -> Speed {
        if self.full_speed_only {
            Speed::FullSpeedOnly
        } else {
            Speed::AllowHighSpeed
        }
    }
}

/// Everything the device borrows for its lifetime. `N` is the depth of each
/// bridge.
pub struct Resources<const N: usize> {
    config_descriptor: [u8; CONFIG_DESCRIPTOR_LEN],
    bos_descriptor: [u8; BOS_DESCRIPTOR_LEN],
    msos_descriptor: [u8; MSOS_DESCRIPTOR_LEN],
    control_buf: [u8; CONTROL_BUF_LEN],
    state: State,
    to_synth: Bridge<N>,
    to_host: Bridge<N>,
}

impl<const N: usize> Default for Resources<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Resources<N> {
    pub const fn new() -> Self {
        Self {
            config_descriptor: [0; CONFIG_DESCRIPTOR_LEN],
            bos_descriptor: [0; BOS_DESCRIPTOR_LEN],
            msos_descriptor: [0; MSOS_DESCRIPTOR_LEN],
            control_buf: [0; CONTROL_BUF_LEN],
            state: State::new(),
            to_synth: Bridge::new(),
            to_host: Bridge::new(),
        }
    }
}

/// USB-domain half: the device stack and the endpoint relays.
pub struct UsbDomain<'d, D: Driver<'d>, const N: usize> {
    usb: UsbDevice<'d, D>,
    link: UsbLink,
    descriptors: DescriptorSet,
    receiver: MidiReceiver<D::EndpointOut>,
    sender: Option<MidiSender<D::EndpointIn>>,
    to_synth: BridgeWriter<'d, N>,
    from_synth: BridgeReader<'d, N>,
}

/// Synthesis-domain half: the far ends of both bridges.
pub struct SynthPort<'d, const N: usize> {
    from_host: BridgeReader<'d, N>,
    to_host: BridgeWriter<'d, N>,
    midi_in: bool,
}

pub fn compose<'d, D: Driver<'d>, const N: usize>(
    driver: D,
    identity: &Identity,
    link: UsbLink,
    features: Features,
    resources: &'d mut Resources<N>,
) -> (UsbDomain<'d, D, N>, SynthPort<'d, N>) {
    let speed = link.speed();
    let descriptors = DescriptorSet::new(identity, features, speed);
    debug!("configuration descriptor: {:02x}", descriptors.configuration());

    let Resources {
        config_descriptor,
        bos_descriptor,
        msos_descriptor,
        control_buf,
        state,
        to_synth,
        to_host,
    } = resources;

    let mut builder = Builder::new(
        driver,
        identity.usb_config(),
        config_descriptor,
        bos_descriptor,
        msos_descriptor,
        control_buf,
    );
    let class = MidiStreaming::new(&mut builder, state, features, speed);
    let usb = builder.build();
    let (receiver, sender) = class.split();

    let (to_synth, from_host) = to_synth.split();
    let (to_host, from_synth) = to_host.split();

    (
        UsbDomain {
            usb,
            link,
            descriptors,
            receiver,
            sender,
            to_synth,
            from_synth,
        },
        SynthPort {
            from_host,
            to_host,
            midi_in: features.midi_in,
        },
    )
}

impl<'d, D: Driver<'d>, const N: usize> UsbDomain<'d, D, N> {
    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    /// Runs the device stack and both relays. With `connect` cleared the
    /// device is never enabled and the relays stay idle.
    pub async fn run(&mut self) -> ! {
        let Self {
            usb,
            link,
            receiver,
            sender,
            to_synth,
            from_synth,
            ..
        } = self;

        let device = async {
            if link.connect {
                usb.run().await
            } else {
                info!("usb link held off the bus");
                pending::<()>().await
            }
        };
        let send = async {
            match sender {
                Some(sender) => sender.run(from_synth).await,
                None => pending::<()>().await,
            }
        };

        let (_, never) = join(join(device, send), receiver.run(to_synth)).await;
        never
    }
}

impl<'d, const N: usize> SynthPort<'d, N> {
    pub fn reader(&mut self) -> &mut BridgeReader<'d, N> {
        &mut self.from_host
    }

    /// Queues `message` for the host. Without the MIDI-IN endpoint there is no
    /// host-bound path and the message is discarded.
    pub fn send(&mut self, cable: u8, message: &MidiMessage) -> Result<(), Overrun> {
        if !self.midi_in {
            return Ok(());
        }
        let packet = EventPacket::from_message(cable, message);
        self.to_host.push_packet(&packet.to_bytes())
    }

    pub async fn run<S: Synth>(&mut self, synth: &mut S) -> ! {
        run_synth(&mut self.from_host, synth).await
    }
}
