//! Control request gate.
//!
//! The device has no vendor extensions: every Vendor or Reserved request is
//! stalled, whatever its code or payload. Standard and Class requests are left
//! to the device stack.

use embassy_usb::control::{InResponse, OutResponse, Request, RequestType};
use embassy_usb::Handler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Disposition {
    Stall,
    Forward,
}

pub fn classify(req: &Request) -> Disposition {
    match req.request_type {
        RequestType::Vendor | RequestType::Reserved => Disposition::Stall,
        RequestType::Standard | RequestType::Class => Disposition::Forward,
    }
}

/// [`Handler`] applying [`classify`] to both control directions.
#[derive(Debug, Default)]
pub struct StallGate {
    stalled: u32,
    configured: bool,
}

impl StallGate {
    pub const fn new() -> Self {
        Self {
            stalled: 0,
            configured: false,
        }
    }

    /// Requests stalled since power-up.
    pub fn stalled(&self) -> u32 {
        self.stalled
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    fn gate(&mut self, req: &Request) -> Disposition {
        let disposition = classify(req);
        if disposition == Disposition::Stall {
            self.stalled = self.stalled.wrapping_add(1);
            debug!(
                "stall {} request {=u8:#x} value {=u16:#x}",
                req.request_type,
                req.request,
                req.value
            );
        }
        disposition
    }
}

impl Handler for StallGate {
    fn enabled(&mut self, enabled: bool) {
        info!("usb enabled: {}", enabled);
    }

    fn reset(&mut self) {
        info!("bus reset");
        self.configured = false;
    }

    fn addressed(&mut self, addr: u8) {
        debug!("addressed {}", addr);
    }

    fn configured(&mut self, configured: bool) {
        info!("configured: {}", configured);
        self.configured = configured;
    }

    fn suspended(&mut self, suspended: bool) {
        debug!("suspended: {}", suspended);
    }

    fn control_out(&mut self, req: Request, data: &[u8]) -> Option<OutResponse> {
        let _ = data;
        match self.gate(&req) {
            Disposition::Stall => Some(OutResponse::Rejected),
            Disposition::Forward => None,
        }
    }

    fn control_in<'a>(&'a mut self, req: Request, buf: &'a mut [u8]) -> Option<InResponse<'a>> {
        let _ = buf;
        match self.gate(&req) {
            Disposition::Stall => Some(InResponse::Rejected),
            Disposition::Forward => None,
        }
    }
}
