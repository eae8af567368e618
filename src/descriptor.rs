//! Descriptor image of the JT51 MIDI streaming function.
//!
//! Everything here is a pure function of [`Identity`], [`Features`] and
//! [`Speed`]. The same jack table and body encoders feed both the
//! [`DescriptorSet`] image and the class registration in [`crate::midi`], so the
//! bytes the device stack serves and the bytes computed here cannot drift apart.
//!
//! Standard bulk endpoint descriptors are the 7-byte USB 2.0 layout the device
//! stack emits. USB-MIDI 1.0 (6.2.1) lists a 9-byte audio-style form with
//! `bRefresh` and `bSynchAddress`; those two zero bytes are not sent.

use embassy_usb::driver::Direction;
use heapless::Vec;

use crate::midi_constants::*;

/// Build-time feature configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Features {
    /// Device-to-host MIDI path: jacks 1/2 and the bulk IN endpoint.
    pub midi_in: bool,
}

impl Features {
    pub const OUT_ONLY: Features = Features { midi_in: false };
    pub const WITH_MIDI_IN: Features = Features { midi_in: true };

    /// Endpoints declared on the streaming interface.
    pub const fn endpoint_count(self) -> u8 {
        if self.midi_in {
            2
        } else {
            1
        }
    }
}

/// Features of this firmware build, selected with the `midi-in` cargo feature.
pub const FEATURES: Features = Features {
    midi_in: cfg!(feature = "midi-in"),
};

/// Bus speed the device is allowed to negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    FullSpeedOnly,
    AllowHighSpeed,
}

impl Speed {
    pub const fn bulk_max_packet_size(self) -> u16 {
        match self {
            Speed::FullSpeedOnly => FULL_SPEED_MAX_PACKET_SIZE,
            Speed::AllowHighSpeed => MAX_PACKET_SIZE,
        }
    }
}

/// Bulk max packet size at high speed.
pub const MAX_PACKET_SIZE: u16 = 512;
/// USB 2.0 ceiling for full-speed bulk endpoints.
pub const FULL_SPEED_MAX_PACKET_SIZE: u16 = 64;
/// Control endpoint 0 max packet size.
pub const MAX_PACKET_SIZE_0: u8 = 64;
/// Both stream endpoints use this number, direction tells them apart.
pub const MIDI_ENDPOINT_NUMBER: u8 = 1;

// Jack ids
pub const JACK_TO_HOST: u8 = 1;
pub const JACK_FROM_SYNTH: u8 = 2;
pub const JACK_FROM_HOST: u8 = 3;
pub const JACK_TO_SYNTH: u8 = 4;

/// Upper bound on the input pins of one OUT jack.
pub const MAX_JACK_SOURCES: usize = 4;
const JACK_BODY_CAPACITY: usize = 5 + 2 * MAX_JACK_SOURCES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum JackKind {
    Embedded = EMBEDDED,
    External = EXTERNAL,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JackDirection {
    In,
    Out,
}

/// A virtual MIDI jack. `sources` lists the IN jacks wired to an OUT jack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jack {
    pub id: u8,
    pub kind: JackKind,
    pub direction: JackDirection,
    pub sources: &'static [u8],
}

impl Jack {
    /// Length of the jack descriptor, header included.
    pub const fn descriptor_len(&self) -> usize {
        match self.direction {
            JackDirection::In => MIDI_IN_JACK_LEN,
            JackDirection::Out => 7 + 2 * self.sources.len(),
        }
    }

    /// Descriptor body following `bLength` and `bDescriptorType` (CS_INTERFACE).
    pub fn body(&self) -> Vec<u8, JACK_BODY_CAPACITY> {
        let mut body = Vec::new();
        match self.direction {
            JackDirection::In => {
                body.extend_from_slice(&[MIDI_IN_JACK, self.kind as u8, self.id])
                    .ok();
            }
            JackDirection::Out => {
                body.extend_from_slice(&[
                    MIDI_OUT_JACK,
                    self.kind as u8,
                    self.id,
                    self.sources.len() as u8,
                ])
                .ok();
                for source in self.sources {
                    // Every source jack exposes a single output pin.
                    body.extend_from_slice(&[*source, 1]).ok();
                }
            }
        }
        body.push(0).ok(); // iJack
        body
    }
}

const HOST_TO_SYNTH: [Jack; 2] = [
    Jack {
        id: JACK_FROM_HOST,
        kind: JackKind::Embedded,
        direction: JackDirection::In,
        sources: &[],
    },
    Jack {
        id: JACK_TO_SYNTH,
        kind: JackKind::External,
        direction: JackDirection::Out,
        sources: &[JACK_FROM_HOST],
    },
];

const BIDIRECTIONAL: [Jack; 4] = [
    HOST_TO_SYNTH[0],
    HOST_TO_SYNTH[1],
    Jack {
        id: JACK_TO_HOST,
        kind: JackKind::Embedded,
        direction: JackDirection::Out,
        sources: &[JACK_FROM_SYNTH],
    },
    Jack {
        id: JACK_FROM_SYNTH,
        kind: JackKind::External,
        direction: JackDirection::In,
        sources: &[],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopologyError {
    ZeroId,
    DuplicateId(u8),
    InputWithSources(u8),
    SourceCount(u8),
    DanglingSource { jack: u8, source: u8 },
    SourceNotInput { jack: u8, source: u8 },
    EndpointJack { endpoint: u8, jack: u8 },
}

/// The jack graph declared on the streaming interface, in descriptor order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    jacks: &'static [Jack],
}

impl Topology {
    pub const fn new(features: Features) -> Self {
        if features.midi_in {
            Self {
                jacks: &BIDIRECTIONAL,
            }
        } else {
            Self {
                jacks: &HOST_TO_SYNTH,
            }
        }
    }

    pub const fn from_jacks(jacks: &'static [Jack]) -> Self {
        Self { jacks }
    }

    pub const fn jacks(&self) -> &'static [Jack] {
        self.jacks
    }

    pub const fn jack(&self, id: u8) -> Option<&'static Jack> {
        let jacks = self.jacks;
        let mut i = 0;
        while i < jacks.len() {
            if jacks[i].id == id {
                return Some(&jacks[i]);
            }
            i += 1;
        }
        None
    }

    /// Summed length of all jack descriptors.
    pub const fn jacks_len(&self) -> usize {
        let mut len = 0;
        let mut i = 0;
        while i < self.jacks.len() {
            len += self.jacks[i].descriptor_len();
            i += 1;
        }
        len
    }

    pub const fn validate(&self) -> Result<(), TopologyError> {
        let jacks = self.jacks;
        let mut i = 0;
        while i < jacks.len() {
            let jack = &jacks[i];
            if jack.id == 0 {
                return Err(TopologyError::ZeroId);
            }
            let mut j = i + 1;
            while j < jacks.len() {
                if jacks[j].id == jack.id {
                    return Err(TopologyError::DuplicateId(jack.id));
                }
                j += 1;
            }
            match jack.direction {
                JackDirection::In => {
                    if !jack.sources.is_empty() {
                        return Err(TopologyError::InputWithSources(jack.id));
                    }
                }
                JackDirection::Out => {
                    if jack.sources.is_empty() || jack.sources.len() > MAX_JACK_SOURCES {
                        return Err(TopologyError::SourceCount(jack.id));
                    }
                    let mut s = 0;
                    while s < jack.sources.len() {
                        let source = jack.sources[s];
                        match self.jack(source) {
                            None => {
                                return Err(TopologyError::DanglingSource {
                                    jack: jack.id,
                                    source,
                                })
                            }
                            Some(src) => {
                                if !matches!(src.direction, JackDirection::In) {
                                    return Err(TopologyError::SourceNotInput {
                                        jack: jack.id,
                                        source,
                                    });
                                }
                            }
                        }
                        s += 1;
                    }
                }
            }
            i += 1;
        }
        Ok(())
    }

    /// An OUT endpoint feeds embedded IN jacks, an IN endpoint drains embedded
    /// OUT jacks.
    pub const fn check_endpoint(&self, endpoint: &MidiEndpoint) -> Result<(), TopologyError> {
        let mut i = 0;
        while i < endpoint.jacks.len() {
            let id = endpoint.jacks[i];
            let legal = match self.jack(id) {
                Some(jack) => {
                    matches!(jack.kind, JackKind::Embedded)
                        && match endpoint.direction {
                            Direction::Out => matches!(jack.direction, JackDirection::In),
                            Direction::In => matches!(jack.direction, JackDirection::Out),
                        }
                }
                None => false,
            };
            if !legal {
                return Err(TopologyError::EndpointJack {
                    endpoint: endpoint.address(),
                    jack: id,
                });
            }
            i += 1;
        }
        Ok(())
    }
}

const fn check_features(features: Features) -> bool {
    let topology = Topology::new(features);
    let speed = Speed::AllowHighSpeed;
    topology.validate().is_ok()
        && topology.check_endpoint(&MidiEndpoint::midi_out(speed)).is_ok()
        && (!features.midi_in || topology.check_endpoint(&MidiEndpoint::midi_in(speed)).is_ok())
        && configuration_len(features) <= CONFIGURATION_CAPACITY
}

const _: () = assert!(check_features(Features::OUT_ONLY));
const _: () = assert!(check_features(Features::WITH_MIDI_IN));

/// A bulk stream endpoint and the embedded jacks it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEndpoint {
    pub direction: Direction,
    pub number: u8,
    pub max_packet_size: u16,
    pub jacks: &'static [u8],
}

impl MidiEndpoint {
    pub const fn midi_out(speed: Speed) -> Self {
        Self {
            direction: Direction::Out,
            number: MIDI_ENDPOINT_NUMBER,
            max_packet_size: speed.bulk_max_packet_size(),
            jacks: &[JACK_FROM_HOST],
        }
    }

    pub const fn midi_in(speed: Speed) -> Self {
        Self {
            direction: Direction::In,
            number: MIDI_ENDPOINT_NUMBER,
            max_packet_size: speed.bulk_max_packet_size(),
            jacks: &[JACK_TO_HOST],
        }
    }

    pub const fn address(&self) -> u8 {
        match self.direction {
            Direction::In => self.number | 0x80,
            Direction::Out => self.number,
        }
    }

    /// Standard endpoint descriptor body, as the device stack writes it
    /// (7-byte form, no `bRefresh`/`bSynchAddress`).
    pub fn body(&self) -> [u8; 5] {
        let [lo, hi] = self.max_packet_size.to_le_bytes();
        [self.address(), BULK, lo, hi, 0]
    }

    /// Class-specific MS_GENERAL endpoint descriptor body (CS_ENDPOINT).
    pub fn class_body(&self) -> Vec<u8, { 2 + MAX_JACK_SOURCES }> {
        let mut body = Vec::new();
        body.extend_from_slice(&[MS_GENERAL, self.jacks.len() as u8]).ok();
        body.extend_from_slice(self.jacks).ok();
        body
    }

    /// Standard plus class-specific descriptor length.
    pub const fn descriptors_len(&self) -> usize {
        ENDPOINT_LEN + 4 + self.jacks.len()
    }
}

/// Stream endpoints in descriptor order.
pub fn endpoints(features: Features, speed: Speed) -> Vec<MidiEndpoint, 2> {
    let mut endpoints = Vec::new();
    endpoints.push(MidiEndpoint::midi_out(speed)).ok();
    if features.midi_in {
        endpoints.push(MidiEndpoint::midi_in(speed)).ok();
    }
    endpoints
}

/// `wTotalLength` of the class-specific MS interface: header, jacks and the
/// endpoint descriptors that follow them.
pub const fn ms_total_len(features: Features) -> u16 {
    let speed = Speed::AllowHighSpeed;
    let mut len = MS_HEADER_LEN + Topology::new(features).jacks_len();
    len += MidiEndpoint::midi_out(speed).descriptors_len();
    if features.midi_in {
        len += MidiEndpoint::midi_in(speed).descriptors_len();
    }
    len as u16
}

/// Class-specific MS header body (CS_INTERFACE).
pub fn ms_header_body(features: Features) -> [u8; 5] {
    let [lo, hi] = ms_total_len(features).to_le_bytes();
    [MS_HEADER, MSC_REVISION[0], MSC_REVISION[1], lo, hi]
}

pub const fn configuration_len(features: Features) -> usize {
    CONFIGURATION_LEN + IAD_LEN + INTERFACE_LEN + ms_total_len(features) as usize
}

pub const CONFIGURATION_CAPACITY: usize = 128;
pub const STRING_CAPACITY: usize = 64;

pub const STRING_INDEX_MANUFACTURER: u8 = 1;
pub const STRING_INDEX_PRODUCT: u8 = 2;
pub const STRING_INDEX_SERIAL_NUMBER: u8 = 3;

/// Who the device claims to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// BCD
    pub device_release: u16,
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: &'static str,
    /// Milliamps
    pub max_power: u16,
}

impl Identity {
    pub const JT51_SYNTH: Identity = Identity {
        vendor_id: 0x16d0,
        product_id: 0x0f3b,
        device_release: 0x0001,
        manufacturer: "N/A",
        product: "JT51-Synth",
        serial_number: "0001",
        max_power: 100,
    };

    /// Device stack configuration for a composite device with IADs.
    pub fn usb_config(&self) -> embassy_usb::Config<'static> {
        let mut config = embassy_usb::Config::new(self.vendor_id, self.product_id);
        config.manufacturer = Some(self.manufacturer);
        config.product = Some(self.product);
        config.serial_number = Some(self.serial_number);
        config.device_release = self.device_release;
        config.max_power = self.max_power;
        config.max_packet_size_0 = MAX_PACKET_SIZE_0;

        // Required for the host to parse the function through its IAD.
        config.device_class = MISC_DEVICE_CLASS;
        config.device_sub_class = COMMON_SUBCLASS;
        config.device_protocol = IAD_PROTOCOL;
        config.composite_with_iads = true;
        config
    }
}

/// Immutable device and configuration descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSet {
    identity: Identity,
    device: [u8; DEVICE_LEN],
    configuration: Vec<u8, CONFIGURATION_CAPACITY>,
}

impl DescriptorSet {
    pub fn new(identity: &Identity, features: Features, speed: Speed) -> Self {
        let [vid_lo, vid_hi] = identity.vendor_id.to_le_bytes();
        let [pid_lo, pid_hi] = identity.product_id.to_le_bytes();
        let [rel_lo, rel_hi] = identity.device_release.to_le_bytes();
        let device = [
            DEVICE_LEN as u8,
            DEVICE,
            0x10,
            0x02, // bcdUSB 2.1, the stack always serves a BOS
            MISC_DEVICE_CLASS,
            COMMON_SUBCLASS,
            IAD_PROTOCOL,
            MAX_PACKET_SIZE_0,
            vid_lo,
            vid_hi,
            pid_lo,
            pid_hi,
            rel_lo,
            rel_hi,
            STRING_INDEX_MANUFACTURER,
            STRING_INDEX_PRODUCT,
            STRING_INDEX_SERIAL_NUMBER,
            1, // bNumConfigurations
        ];

        let mut image = Image::default();
        image.write(
            CONFIGURATION,
            &[
                0,
                0, // wTotalLength, patched below
                1, // bNumInterfaces
                1, // bConfigurationValue
                0, // iConfiguration
                0x80, // bus powered
                (identity.max_power / 2) as u8,
            ],
        );
        image.write(
            INTERFACE_ASSOCIATION,
            &[0, 1, AUDIO, MIDISTREAMING, PROTOCOL_UNDEFINED, 0],
        );
        image.write(
            INTERFACE,
            &[
                0, // bInterfaceNumber
                0, // bAlternateSetting
                features.endpoint_count(),
                AUDIO,
                MIDISTREAMING,
                PROTOCOL_UNDEFINED,
                0,
            ],
        );
        image.write(CS_INTERFACE, &ms_header_body(features));
        for jack in Topology::new(features).jacks() {
            image.write(CS_INTERFACE, &jack.body());
        }
        for endpoint in endpoints(features, speed) {
            image.write(ENDPOINT, &endpoint.body());
            image.write(CS_ENDPOINT, &endpoint.class_body());
        }
        let total = (image.buf.len() as u16).to_le_bytes();
        image.buf[2..4].copy_from_slice(&total);

        Self {
            identity: *identity,
            device,
            configuration: image.buf,
        }
    }

    pub fn device(&self) -> &[u8] {
        &self.device
    }

    pub fn configuration(&self) -> &[u8] {
        &self.configuration
    }

    /// String descriptor `index`; index 0 is the language table.
    pub fn string(&self, index: u8) -> Option<Vec<u8, STRING_CAPACITY>> {
        let mut descriptor = Vec::new();
        let text = match index {
            0 => {
                let [lo, hi] = ENGLISH_US.to_le_bytes();
                descriptor.extend_from_slice(&[4, STRING, lo, hi]).ok()?;
                return Some(descriptor);
            }
            STRING_INDEX_MANUFACTURER => self.identity.manufacturer,
            STRING_INDEX_PRODUCT => self.identity.product,
            STRING_INDEX_SERIAL_NUMBER => self.identity.serial_number,
            _ => return None,
        };
        descriptor.extend_from_slice(&[0, STRING]).ok()?;
        for unit in text.encode_utf16() {
            descriptor.extend_from_slice(&unit.to_le_bytes()).ok()?;
        }
        descriptor[0] = descriptor.len() as u8;
        Some(descriptor)
    }
}

#[derive(Default)]
struct Image {
    buf: Vec<u8, CONFIGURATION_CAPACITY>,
}

impl Image {
    fn write(&mut self, descriptor_type: u8, body: &[u8]) {
        // Capacity is checked at compile time against the largest topology.
        let written = self
            .buf
            .extend_from_slice(&[(body.len() + 2) as u8, descriptor_type])
            .and_then(|_| self.buf.extend_from_slice(body));
        debug_assert!(written.is_ok(), "configuration image full");
    }
}
