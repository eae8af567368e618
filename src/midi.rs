//! USB MIDI 1.0 streaming function.
//!
//! One AudioControl-less MIDIStreaming interface behind an IAD, carrying the
//! jack topology from [`crate::descriptor`], bulk OUT endpoint 1 and, with the
//! `midi-in` feature, bulk IN endpoint 1.

use core::marker::PhantomData;
use core::mem::MaybeUninit;

use embassy_usb::driver::{Driver, Endpoint, EndpointError, EndpointIn, EndpointOut};
use embassy_usb::Builder;

use crate::bridge::{BridgeReader, BridgeWriter};
use crate::control::StallGate;
use crate::descriptor::{ms_header_body, Features, MidiEndpoint, Speed, Topology, MAX_PACKET_SIZE};
use crate::midi_constants::*;

/// Storage for the parts of the class the device stack borrows.
pub struct State {
    gate: MaybeUninit<StallGate>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub const fn new() -> Self {
        Self {
            gate: MaybeUninit::uninit(),
        }
    }
}

pub struct MidiStreaming<'d, D: Driver<'d>> {
    read_ep: D::EndpointOut,
    write_ep: Option<D::EndpointIn>,
    _driver: PhantomData<&'d ()>,
}

impl<'d, D: Driver<'d>> MidiStreaming<'d, D> {
    /// [`Config::composite_with_iads`](embassy_usb::Config) must be set; use
    /// [`Identity::usb_config`](crate::descriptor::Identity::usb_config).
    pub fn new(builder: &mut Builder<'d, D>, state: &'d mut State, features: Features, speed: Speed) -> Self {
        let mut fun = builder.function(AUDIO, MIDISTREAMING, PROTOCOL_UNDEFINED);

        //  Standard MS Interface Descriptor (6.1.1)
        let mut int = fun.interface();
        let mut alt = int.alt_setting(AUDIO, MIDISTREAMING, PROTOCOL_UNDEFINED, None);

        //  Class-Specific MS Interface Header Descriptor (6.1.2.1)
        alt.descriptor(CS_INTERFACE, &ms_header_body(features));

        //  MIDI IN / OUT Jack Descriptors (6.1.2.2, 6.1.2.3)
        for jack in Topology::new(features).jacks() {
            alt.descriptor(CS_INTERFACE, &jack.body());
        }

        //  Standard and Class-Specific Bulk Data Endpoint Descriptors (6.2)
        let out = MidiEndpoint::midi_out(speed);
        let read_ep = alt.endpoint_bulk_out(out.max_packet_size);
        check_address(&out, read_ep.info().addr.into());
        alt.descriptor(CS_ENDPOINT, &out.class_body());

        let write_ep = features.midi_in.then(|| {
            let endpoint = MidiEndpoint::midi_in(speed);
            let ep = alt.endpoint_bulk_in(endpoint.max_packet_size);
            check_address(&endpoint, ep.info().addr.into());
            alt.descriptor(CS_ENDPOINT, &endpoint.class_body());
            ep
        });
        drop(fun);

        let gate = state.gate.write(StallGate::new());
        builder.handler(gate);

        Self {
            read_ep,
            write_ep,
            _driver: PhantomData,
        }
    }

    pub fn split(self) -> (MidiReceiver<D::EndpointOut>, Option<MidiSender<D::EndpointIn>>) {
        (
            MidiReceiver { ep: self.read_ep },
            self.write_ep.map(|ep| MidiSender { ep }),
        )
    }
}

fn check_address(endpoint: &MidiEndpoint, allocated: u8) {
    if allocated != endpoint.address() {
        warn!(
            "endpoint allocated at {=u8:#x}, descriptors declare {=u8:#x}",
            allocated,
            endpoint.address()
        );
    }
}

/// Host-to-device stream: bulk OUT endpoint into a bridge.
pub struct MidiReceiver<E: EndpointOut> {
    ep: E,
}

impl<E: EndpointOut> MidiReceiver<E> {
    pub fn new(ep: E) -> Self {
        Self { ep }
    }

    pub async fn wait_connection(&mut self) {
        self.ep.wait_enabled().await;
    }

    pub async fn run<const N: usize>(&mut self, writer: &mut BridgeWriter<'_, N>) -> ! {
        loop {
            self.wait_connection().await;
            info!("midi out connected");
            let _err = self.relay(writer).await;
            info!("midi out disconnected: {}", _err);
        }
    }

    /// Relays packets until the endpoint fails.
    ///
    /// The endpoint read is the only await point: a packet is copied into the
    /// bridge, or dropped if it does not fit, before the endpoint is re-armed.
    pub async fn relay<const N: usize>(&mut self, writer: &mut BridgeWriter<'_, N>) -> EndpointError {
        let mut buf = [0u8; MAX_PACKET_SIZE as usize];
        loop {
            let n = match self.ep.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => return e,
            };
            trace!("midi out {:02x}", &buf[..n]);
            if let Err(_overrun) = writer.push_packet(&buf[..n]) {
                warn!(
                    "bridge full, dropped {} bytes ({} overruns)",
                    _overrun.dropped,
                    writer.overruns()
                );
            }
        }
    }
}

/// Device-to-host stream: a bridge into bulk IN endpoint.
pub struct MidiSender<E: EndpointIn> {
    ep: E,
}

impl<E: EndpointIn> MidiSender<E> {
    pub fn new(ep: E) -> Self {
        Self { ep }
    }

    pub async fn wait_connection(&mut self) {
        self.ep.wait_enabled().await;
    }

    pub async fn run<const N: usize>(&mut self, reader: &mut BridgeReader<'_, N>) -> ! {
        loop {
            self.wait_connection().await;
            info!("midi in connected");
            let _err = self.relay(reader).await;
            info!("midi in disconnected: {}", _err);
        }
    }

    /// Sends whatever the bridge holds in packets of at most max packet size.
    /// A transfer that ends on a full packet is closed with a zero-length one.
    pub async fn relay<const N: usize>(&mut self, reader: &mut BridgeReader<'_, N>) -> EndpointError {
        let mut buf = [0u8; MAX_PACKET_SIZE as usize];
        let max_packet_size = (self.ep.info().max_packet_size as usize).min(buf.len());
        loop {
            let (n, closed) = reader.read_chunk(&mut buf[..max_packet_size]).await;
            trace!("midi in {:02x}", &buf[..n]);
            if let Err(e) = self.ep.write(&buf[..n]).await {
                return e;
            }
            if n == max_packet_size && closed && reader.is_empty() {
                if let Err(e) = self.ep.write(&[]).await {
                    return e;
                }
            }
        }
    }
}
