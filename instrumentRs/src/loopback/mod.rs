//! The loopback module provides an instrument simulator for testing purposes.
//!
//! The [`LoopbackInterfaceString`] allows to test instruments drivers that communicate using
//! strings (which are then encoded as bytes of course) and have a fixed terminator to declare the
//! end of a line. Write and read failures can be injected through its [`LoopbackFaults`] handle in
//! order to test retry and recovery logic.
//!
//! The [`LoopbackConnector`] hands out prepared loopback interfaces to a [`crate::Session`], one
//! per connection attempt.

mod loopback_interface_string;

pub use loopback_interface_string::*;

use std::{collections::VecDeque, time::Duration};

use crate::{Connector, InstrumentError};

/// A self-incrementing index structure that by default starts at 0 and increments whenever `next`
/// is called.
#[derive(Debug, Default)]
struct IncrIndex {
    index: usize,
}

impl IncrIndex {
    fn next(&mut self) -> usize {
        let current = self.index;
        self.index += 1;
        current
    }
}

/// A [`Connector`] that returns prepared [`LoopbackInterfaceString`]s in order.
///
/// Every call to `open` takes the next interface. If no interface is left, or if a failure was
/// queued with [`LoopbackConnector::fail_next_open`], opening fails with an I/O error, as it
/// would if the instrument was unplugged.
#[derive(Default)]
pub struct LoopbackConnector {
    interfaces: VecDeque<Option<LoopbackInterfaceString>>,
    opened: Vec<String>,
}

impl LoopbackConnector {
    /// Create a new connector with the interfaces to hand out.
    pub fn new(interfaces: Vec<LoopbackInterfaceString>) -> Self {
        LoopbackConnector {
            interfaces: interfaces.into_iter().map(Some).collect(),
            opened: Vec::new(),
        }
    }

    /// Let the next call to `open` fail before any queued interface is used.
    pub fn fail_next_open(&mut self) {
        self.interfaces.push_front(None);
    }

    /// Queue another interface behind the existing ones.
    pub fn push(&mut self, interface: LoopbackInterfaceString) {
        self.interfaces.push_back(Some(interface));
    }

    /// All resource strings that `open` was called with, in order.
    pub fn opened(&self) -> &[String] {
        &self.opened
    }
}

impl Connector for LoopbackConnector {
    type Interface = LoopbackInterfaceString;

    fn open(
        &mut self,
        resource: &str,
        _timeout: Duration,
    ) -> Result<Self::Interface, InstrumentError> {
        self.opened.push(resource.to_string());
        match self.interfaces.pop_front() {
            Some(Some(interface)) => Ok(interface),
            _ => Err(InstrumentError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Loopback resource {resource} is not available"),
            ))),
        }
    }
}
