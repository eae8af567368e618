//! Scripted device driver for host tests.
//!
//! Every handle the [`MockDriver`] gives out shares one [`Host`]. A test queues
//! bus events, setup packets and bulk OUT packets, runs the real device stack
//! on top, and reads back what the device answered.

use core::future::poll_fn;
use core::task::Poll;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use embassy_usb::driver::{
    Bus, ControlPipe, Direction, Driver, Endpoint, EndpointAddress, EndpointAllocError, EndpointError,
    EndpointIn, EndpointInfo, EndpointOut, EndpointType, Event, Unsupported,
};

/// What the device did with one control transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Data(Vec<u8>),
    Ack,
    Stall,
}

#[derive(Debug, Default)]
struct Host {
    events: VecDeque<Event>,
    setups: VecDeque<[u8; 8]>,
    control_data: VecDeque<Vec<u8>>,
    data_in: Vec<u8>,
    replies: Vec<Reply>,
    bulk_out: VecDeque<Vec<u8>>,
    bulk_in: Vec<Vec<u8>>,
    suspend_reported: bool,
    bus_enabled: bool,
    endpoints_enabled: bool,
    started: bool,
    next_out: usize,
    next_in: usize,
}

/// Host side of the scripted link.
#[derive(Debug, Clone, Default)]
pub struct MockHost(Rc<RefCell<Host>>);

pub fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let [v0, v1] = value.to_le_bytes();
    let [i0, i1] = index.to_le_bytes();
    let [l0, l1] = length.to_le_bytes();
    [request_type, request, v0, v1, i0, i1, l0, l1]
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(&self) -> MockDriver {
        MockDriver { host: self.clone() }
    }

    /// Power, bus reset, address 5 and configuration 1.
    pub fn enumerate(&self) {
        self.event(Event::PowerDetected);
        self.event(Event::Reset);
        self.configure();
    }

    /// SET_ADDRESS 5 and SET_CONFIGURATION 1.
    pub fn configure(&self) {
        self.control_out(setup(0x00, 0x05, 5, 0, 0), &[]);
        self.control_out(setup(0x00, 0x09, 1, 0, 0), &[]);
    }

    pub fn event(&self, event: Event) {
        self.0.borrow_mut().events.push_back(event);
    }

    pub fn control_in(&self, setup: [u8; 8]) {
        self.0.borrow_mut().setups.push_back(setup);
    }

    pub fn control_out(&self, setup: [u8; 8], data: &[u8]) {
        let mut host = self.0.borrow_mut();
        host.setups.push_back(setup);
        // The stack only reads a data stage when wLength is non-zero.
        if !data.is_empty() {
            host.control_data.push_back(data.to_vec());
        }
    }

    /// Queues one bulk OUT packet.
    pub fn send(&self, packet: &[u8]) {
        self.0.borrow_mut().bulk_out.push_back(packet.to_vec());
    }

    /// Drops the link; packets already queued are still delivered.
    pub fn unplug(&self) {
        self.0.borrow_mut().endpoints_enabled = false;
    }

    pub fn replies(&self) -> Vec<Reply> {
        core::mem::take(&mut self.0.borrow_mut().replies)
    }

    /// Bulk IN packets written by the device.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.0.borrow().bulk_in.clone()
    }

    pub fn is_bus_enabled(&self) -> bool {
        self.0.borrow().bus_enabled
    }

    pub fn is_configured(&self) -> bool {
        self.0.borrow().endpoints_enabled
    }

    pub fn is_started(&self) -> bool {
        self.0.borrow().started
    }

    /// Everything scripted has been consumed by the device.
    pub fn is_drained(&self) -> bool {
        let host = self.0.borrow();
        host.events.is_empty() && host.setups.is_empty() && host.bulk_out.is_empty()
    }

    /// A configured OUT endpoint outside any device stack.
    pub fn endpoint_out(&self, number: usize, max_packet_size: u16) -> MockEndpointOut {
        self.0.borrow_mut().endpoints_enabled = true;
        MockEndpointOut {
            host: self.clone(),
            info: info(number, Direction::Out, max_packet_size),
        }
    }

    /// A configured IN endpoint outside any device stack.
    pub fn endpoint_in(&self, number: usize, max_packet_size: u16) -> MockEndpointIn {
        self.0.borrow_mut().endpoints_enabled = true;
        MockEndpointIn {
            host: self.clone(),
            info: info(number, Direction::In, max_packet_size),
        }
    }
}

fn info(number: usize, direction: Direction, max_packet_size: u16) -> EndpointInfo {
    EndpointInfo {
        addr: EndpointAddress::from_parts(number, direction),
        ep_type: EndpointType::Bulk,
        max_packet_size,
        interval_ms: 0,
    }
}

pub struct MockDriver {
    host: MockHost,
}

impl<'a> Driver<'a> for MockDriver {
    type EndpointOut = MockEndpointOut;
    type EndpointIn = MockEndpointIn;
    type ControlPipe = MockControlPipe;
    type Bus = MockBus;

    fn alloc_endpoint_out(
        &mut self,
        ep_type: EndpointType,
        max_packet_size: u16,
        interval_ms: u8,
    ) -> Result<Self::EndpointOut, EndpointAllocError> {
        let mut host = self.host.0.borrow_mut();
        host.next_out += 1;
        let mut info = info(host.next_out, Direction::Out, max_packet_size);
        info.ep_type = ep_type;
        info.interval_ms = interval_ms;
        Ok(MockEndpointOut {
            host: self.host.clone(),
            info,
        })
    }

    fn alloc_endpoint_in(
        &mut self,
        ep_type: EndpointType,
        max_packet_size: u16,
        interval_ms: u8,
    ) -> Result<Self::EndpointIn, EndpointAllocError> {
        let mut host = self.host.0.borrow_mut();
        host.next_in += 1;
        let mut info = info(host.next_in, Direction::In, max_packet_size);
        info.ep_type = ep_type;
        info.interval_ms = interval_ms;
        Ok(MockEndpointIn {
            host: self.host.clone(),
            info,
        })
    }

    fn start(self, control_max_packet_size: u16) -> (Self::Bus, Self::ControlPipe) {
        self.host.0.borrow_mut().started = true;
        (
            MockBus {
                host: self.host.clone(),
            },
            MockControlPipe {
                host: self.host,
                max_packet_size: control_max_packet_size as usize,
            },
        )
    }
}

pub struct MockBus {
    host: MockHost,
}

impl Bus for MockBus {
    async fn enable(&mut self) {
        self.host.0.borrow_mut().bus_enabled = true;
    }

    async fn disable(&mut self) {
        let mut host = self.host.0.borrow_mut();
        host.bus_enabled = false;
        host.endpoints_enabled = false;
    }

    async fn poll(&mut self) -> Event {
        poll_fn(|_| {
            let mut host = self.host.0.borrow_mut();
            if let Some(event) = host.events.pop_front() {
                if event == Event::Reset {
                    host.endpoints_enabled = false;
                }
                return Poll::Ready(event);
            }
            // Suspend once the script ran out, so `run_until_suspend` returns.
            if host.setups.is_empty() && !host.suspend_reported {
                host.suspend_reported = true;
                return Poll::Ready(Event::Suspend);
            }
            Poll::Pending
        })
        .await
    }

    fn endpoint_set_enabled(&mut self, _ep_addr: EndpointAddress, enabled: bool) {
        self.host.0.borrow_mut().endpoints_enabled = enabled;
    }

    fn endpoint_set_stalled(&mut self, _ep_addr: EndpointAddress, _stalled: bool) {}

    fn endpoint_is_stalled(&mut self, _ep_addr: EndpointAddress) -> bool {
        false
    }

    async fn remote_wakeup(&mut self) -> Result<(), Unsupported> {
        Err(Unsupported)
    }
}

pub struct MockControlPipe {
    host: MockHost,
    max_packet_size: usize,
}

impl ControlPipe for MockControlPipe {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    async fn setup(&mut self) -> [u8; 8] {
        poll_fn(|_| match self.host.0.borrow_mut().setups.pop_front() {
            Some(setup) => Poll::Ready(setup),
            None => Poll::Pending,
        })
        .await
    }

    async fn data_out(&mut self, buf: &mut [u8], _first: bool, _last: bool) -> Result<usize, EndpointError> {
        let data = self.host.0.borrow_mut().control_data.pop_front().unwrap_or_default();
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn data_in(&mut self, data: &[u8], first: bool, last: bool) -> Result<(), EndpointError> {
        let mut host = self.host.0.borrow_mut();
        if first {
            host.data_in.clear();
        }
        host.data_in.extend_from_slice(data);
        if last {
            let data = core::mem::take(&mut host.data_in);
            host.replies.push(Reply::Data(data));
        }
        Ok(())
    }

    async fn accept(&mut self) {
        self.host.0.borrow_mut().replies.push(Reply::Ack);
    }

    async fn reject(&mut self) {
        self.host.0.borrow_mut().replies.push(Reply::Stall);
    }

    async fn accept_set_address(&mut self, _addr: u8) {
        self.host.0.borrow_mut().replies.push(Reply::Ack);
    }
}

pub struct MockEndpointOut {
    host: MockHost,
    info: EndpointInfo,
}

impl Endpoint for MockEndpointOut {
    fn info(&self) -> &EndpointInfo {
        &self.info
    }

    async fn wait_enabled(&mut self) {
        poll_fn(|_| {
            if self.host.0.borrow().endpoints_enabled {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

impl EndpointOut for MockEndpointOut {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, EndpointError> {
        poll_fn(|_| {
            let mut host = self.host.0.borrow_mut();
            if let Some(packet) = host.bulk_out.pop_front() {
                if packet.len() > buf.len() {
                    return Poll::Ready(Err(EndpointError::BufferOverflow));
                }
                buf[..packet.len()].copy_from_slice(&packet);
                return Poll::Ready(Ok(packet.len()));
            }
            if host.endpoints_enabled {
                Poll::Pending
            } else {
                Poll::Ready(Err(EndpointError::Disabled))
            }
        })
        .await
    }
}

pub struct MockEndpointIn {
    host: MockHost,
    info: EndpointInfo,
}

impl Endpoint for MockEndpointIn {
    fn info(&self) -> &EndpointInfo {
        &self.info
    }

    async fn wait_enabled(&mut self) {
        poll_fn(|_| {
            if self.host.0.borrow().endpoints_enabled {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

impl EndpointIn for MockEndpointIn {
    async fn write(&mut self, buf: &[u8]) -> Result<(), EndpointError> {
        let mut host = self.host.0.borrow_mut();
        if !host.endpoints_enabled {
            return Err(EndpointError::Disabled);
        }
        if buf.len() > self.info.max_packet_size as usize {
            return Err(EndpointError::BufferOverflow);
        }
        host.bulk_in.push(buf.to_vec());
        Ok(())
    }
}
