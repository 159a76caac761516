//! Loopback interface implemented for testing instruments that communicate by sending strings.
//!
//! End-of-command is in these cases always determined by a terminator string, usually `"\n"` or
//! similar.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{InstrumentError, InstrumentInterface, loopback::IncrIndex};

/// A scripted instrument for driver and session tests.
///
/// The interface knows every line the host is expected to send and every line the instrument
/// answers with. Unexpected commands panic right away, unused ones panic when the interface is
/// dropped.
///
/// # Example
///
/// A session connects through a [`crate::LoopbackConnector`], reads the identification, and then
/// has to survive one lost reply.
///
/// ```
/// use instrumentrs::{LoopbackConnector, LoopbackInterfaceString, Session, SessionOptions};
///
/// let idn = "RIGOL TECHNOLOGIES,DP2031,DP2D0,00.01.14";
/// let host2inst = vec!["*IDN?".to_string(), "*STB?".to_string(), "*STB?".to_string()];
/// let inst2host = vec![idn.to_string(), "0".to_string()];
/// let loopback = LoopbackInterfaceString::new(host2inst, inst2host, "\n");
/// let faults = loopback.faults();
///
/// let mut session = Session::new(LoopbackConnector::new(vec![loopback]));
/// assert_eq!(session.connect("LOOPBACK", SessionOptions::default()).unwrap(), idn);
///
/// faults.fail_replies_to("*STB?", 1);
/// assert_eq!(session.query("*STB?").unwrap(), "0");
/// ```
///
/// # Fault injection
///
/// Failures are injected through the [`LoopbackFaults`] handle returned by
/// [`LoopbackInterfaceString::faults`]. The handle stays usable after the interface was moved,
/// e.g., into a [`crate::Session`].
pub struct LoopbackInterfaceString {
    from_host: Vec<String>,
    from_inst: Vec<String>,
    terminator_exp: String,
    from_host_index: IncrIndex,
    from_inst_index: IncrIndex,
    curr_bytes: VecDeque<u8>,
    terminator: String,
    read_terminator: String,
    timeout: Duration,
    faults: LoopbackFaults,
}

impl LoopbackInterfaceString {
    /// Create a loopback instrument from the scripted exchange.
    ///
    /// Both lists are consumed in order. Commands are compared without their terminator, which
    /// must match `terminator_exp`.
    ///
    /// # Arguments:
    /// * `from_host` - Commands the host has to send.
    /// * `from_inst` - Replies the instrument sends back.
    /// * `terminator_exp` - Terminator the host has to append to every command.
    pub fn new(from_host: Vec<String>, from_inst: Vec<String>, terminator_exp: &str) -> Self {
        LoopbackInterfaceString {
            from_host,
            from_inst,
            terminator_exp: terminator_exp.to_string(),
            from_host_index: IncrIndex::default(),
            from_inst_index: IncrIndex::default(),
            curr_bytes: VecDeque::new(),
            terminator: "\n".to_string(), // default terminator, as interfaces
            read_terminator: "\n".to_string(),
            timeout: Duration::from_secs(3),
            faults: LoopbackFaults::default(),
        }
    }

    /// Get a handle to inject failures into this interface.
    pub fn faults(&self) -> LoopbackFaults {
        self.faults.clone()
    }

    /// Panic unless the interface currently uses `expected_terminator`.
    pub fn test_terminator(&self, expected_terminator: &str) {
        assert_eq!(
            expected_terminator, self.terminator,
            "Expected terminator '{expected_terminator}', got '{}'",
            self.terminator
        );
    }

    /// Panic if any scripted command or reply was not used.
    ///
    /// Runs on drop unless the thread is already panicking.
    pub fn finalize(&mut self) {
        let from_host_leftover = self.from_host.get(self.from_host_index.index);
        let from_inst_leftover = self.from_inst.get(self.from_inst_index.index);
        if let Some(fil) = from_host_leftover {
            panic!("Leftover expected commands found from host to instrument: {fil}");
        }
        if let Some(fil) = from_inst_leftover {
            panic!("Leftover expected commands found from instrument to host: {fil}");
        }
    }

    /// Get the next command from host to instrument as a string including the terminator.
    fn get_next_from_host_with_terminator(&mut self) -> String {
        let cmd = self
            .from_host
            .get(self.from_host_index.next())
            .expect("No more commands were expected from host to instrument.");
        format!("{cmd}{}", self.terminator_exp)
    }

    /// Get the next command from instrument to host as a string including the terminator.
    fn get_next_from_inst_with_terminator(&mut self) -> String {
        let cmd = self
            .from_inst
            .get(self.from_inst_index.next())
            .expect("No more commands were expected from instrument to host.");
        format!("{cmd}{}", self.terminator_exp)
    }

    /// Function to read exactly one byte from the next command from the instrument.
    ///
    /// This just panics if there are no more commands. If there are no more commands but one is
    /// required, the panic is justified as this is a test interface.
    fn read_one_byte(&mut self) -> u8 {
        match self.curr_bytes.pop_front() {
            Some(byte) => byte,
            None => {
                let next_cmd = self.get_next_from_inst_with_terminator();
                self.curr_bytes = next_cmd.as_bytes().iter().copied().collect();
                self.read_one_byte()
            }
        }
    }
}

impl InstrumentInterface for LoopbackInterfaceString {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), InstrumentError> {
        if self.faults.take_read_failure() {
            return Err(InstrumentError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "injected read failure",
            )));
        }
        for byte in buf.iter_mut() {
            *byte = self.read_one_byte();
        }
        Ok(())
    }

    fn write_raw(&mut self, cmd: &[u8]) -> Result<(), InstrumentError> {
        let sent = String::from_utf8_lossy(cmd);
        let key = sent.strip_suffix(self.terminator.as_str()).unwrap_or(&sent);
        if self.faults.take_write_failure(key) {
            return Err(InstrumentError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("injected write failure for '{key}'"),
            )));
        }

        let exp = self.get_next_from_host_with_terminator();
        assert_eq!(
            exp.as_bytes(),
            cmd,
            "Expected sendcmd '{exp}', got '{sent}'"
        );
        self.faults.arm_reply_failure(key);
        Ok(())
    }

    fn get_terminator(&self) -> &str {
        self.terminator.as_str()
    }

    fn set_terminator(&mut self, terminator: &str) {
        self.terminator = terminator.to_string();
        self.read_terminator = terminator.to_string();
    }

    fn get_read_terminator(&self) -> &str {
        self.read_terminator.as_str()
    }

    fn set_read_terminator(&mut self, terminator: &str) {
        self.read_terminator = terminator.to_string();
    }

    fn get_timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), InstrumentError> {
        self.timeout = timeout;
        Ok(())
    }
}

impl Drop for LoopbackInterfaceString {
    fn drop(&mut self) {
        // a failing test already panics, do not turn that into an abort
        if !std::thread::panicking() {
            self.finalize();
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    writes: HashMap<String, usize>,
    replies: HashMap<String, usize>,
    reads: usize,
    next_read: bool,
}

/// Injects failures into a [`LoopbackInterfaceString`].
///
/// A failed write does not consume an expected command, a failed read does not consume a
/// response. All clones of a handle act on the same interface.
#[derive(Clone, Debug, Default)]
pub struct LoopbackFaults {
    inner: Arc<Mutex<Faults>>,
}

impl LoopbackFaults {
    /// Let the next `times` writes of `cmd` (without terminator) fail with an I/O error.
    pub fn fail_writes(&self, cmd: &str, times: usize) {
        *self.lock().writes.entry(cmd.to_string()).or_default() += times;
    }

    /// Let the next `times` reads fail with a timed out I/O error.
    pub fn fail_reads(&self, times: usize) {
        self.lock().reads += times;
    }

    /// Let the read after each of the next `times` successful writes of `cmd` fail.
    pub fn fail_replies_to(&self, cmd: &str, times: usize) {
        *self.lock().replies.entry(cmd.to_string()).or_default() += times;
    }

    /// Number of injected write failures for `cmd` that were not used up yet.
    pub fn remaining_write_failures(&self, cmd: &str) -> usize {
        self.lock().writes.get(cmd).copied().unwrap_or(0)
    }

    /// Number of injected read failures that were not used up yet.
    pub fn remaining_read_failures(&self) -> usize {
        let faults = self.lock();
        faults.reads + faults.replies.values().sum::<usize>() + usize::from(faults.next_read)
    }

    fn take_write_failure(&self, cmd: &str) -> bool {
        match self.lock().writes.get_mut(cmd) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    fn arm_reply_failure(&self, cmd: &str) {
        let mut guard = self.lock();
        let faults = &mut *guard;
        if let Some(left) = faults.replies.get_mut(cmd) {
            if *left > 0 {
                *left -= 1;
                faults.next_read = true;
            }
        }
    }

    fn take_read_failure(&self) -> bool {
        let mut faults = self.lock();
        if faults.next_read {
            faults.next_read = false;
            true
        } else if faults.reads > 0 {
            faults.reads -= 1;
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, Faults> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
