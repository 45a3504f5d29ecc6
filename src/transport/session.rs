use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::{Finder, Receiver, Sender, SourceInfo, Transport};

/// Owns every transport handle for one run.
///
/// Handles are released exactly once, in the order receiver, sender, finder,
/// global teardown, either through `close` or when the session drops.
pub struct Session {
    transport: Box<dyn Transport>,
    finder: Option<Box<dyn Finder>>,
    receiver: Option<Box<dyn Receiver>>,
    sender: Option<Box<dyn Sender>>,
    active: bool,
}

impl Session {
    /// Initializes the transport library.
    pub fn start(mut transport: Box<dyn Transport>) -> Result<Self> {
        transport
            .initialize()
            .with_context(|| format!("failed to initialize {} transport", transport.name()))?;
        log::debug!("{} transport initialized", transport.name());
        Ok(Self {
            transport,
            finder: None,
            receiver: None,
            sender: None,
            active: true,
        })
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Lists sources, creating the finder on first use.
    pub fn discover(&mut self, timeout: Duration) -> Result<Vec<SourceInfo>> {
        if self.finder.is_none() {
            let finder = self
                .transport
                .create_finder()
                .context("failed to create source finder")?;
            self.finder = Some(finder);
        }
        let finder = self
            .finder
            .as_deref_mut()
            .ok_or_else(|| anyhow!("source finder unavailable"))?;
        finder.sources(timeout)
    }

    pub fn connect(&mut self, source: &SourceInfo) -> Result<()> {
        let receiver = self
            .transport
            .connect(source)
            .with_context(|| format!("failed to create receiver for {}", source.name))?;
        self.receiver = Some(receiver);
        log::info!("receiver connected to {}", source.name);
        Ok(())
    }

    pub fn create_sender(&mut self, name: &str) -> Result<()> {
        let sender = self
            .transport
            .create_sender(name)
            .with_context(|| format!("failed to create sender {}", name))?;
        self.sender = Some(sender);
        log::info!("sender created: {}", name);
        Ok(())
    }

    /// Borrow the connected receiver and sender together.
    pub fn streams(&mut self) -> Result<(&mut dyn Receiver, &mut dyn Sender)> {
        let receiver = self
            .receiver
            .as_deref_mut()
            .ok_or_else(|| anyhow!("no receiver connected"))?;
        let sender = self
            .sender
            .as_deref_mut()
            .ok_or_else(|| anyhow!("no sender created"))?;
        Ok((receiver, sender))
    }

    /// Releases every handle now instead of at drop.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        drop(self.receiver.take());
        drop(self.sender.take());
        drop(self.finder.take());
        self.transport.teardown();
        log::debug!("{} transport torn down", self.transport.name());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AudioFrame, Capture, OutputFrame, VideoFrame};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    struct Handle(&'static str, Log);

    impl Drop for Handle {
        fn drop(&mut self) {
            self.1.borrow_mut().push(self.0);
        }
    }

    impl Finder for Handle {
        fn sources(&mut self, _timeout: Duration) -> Result<Vec<SourceInfo>> {
            Ok(vec![SourceInfo::new("cam")])
        }
    }

    impl Receiver for Handle {
        fn capture(&mut self, _timeout: Duration) -> Result<Capture> {
            Ok(Capture::Timeout)
        }
        fn free_video(&mut self, _frame: VideoFrame) {}
        fn free_audio(&mut self, _frame: AudioFrame) {}
    }

    impl Sender for Handle {
        fn send_video(&mut self, _frame: &OutputFrame) -> Result<()> {
            Ok(())
        }
    }

    struct Recording {
        log: Log,
        fail_init: bool,
    }

    impl Transport for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn initialize(&mut self) -> Result<()> {
            if self.fail_init {
                return Err(anyhow!("no runtime"));
            }
            Ok(())
        }
        fn create_finder(&mut self) -> Result<Box<dyn Finder>> {
            Ok(Box::new(Handle("finder", self.log.clone())))
        }
        fn connect(&mut self, _source: &SourceInfo) -> Result<Box<dyn Receiver>> {
            Ok(Box::new(Handle("receiver", self.log.clone())))
        }
        fn create_sender(&mut self, _name: &str) -> Result<Box<dyn Sender>> {
            Ok(Box::new(Handle("sender", self.log.clone())))
        }
        fn teardown(&mut self) {
            self.log.borrow_mut().push("teardown");
        }
    }

    #[test]
    fn releases_in_fixed_order_once() -> Result<()> {
        let log: Log = Rc::default();
        let mut session = Session::start(Box::new(Recording {
            log: log.clone(),
            fail_init: false,
        }))?;
        let sources = session.discover(Duration::ZERO)?;
        session.connect(&sources[0])?;
        session.create_sender("out")?;
        assert!(session.streams().is_ok());
        session.close();

        assert_eq!(*log.borrow(), vec!["receiver", "sender", "finder", "teardown"]);
        Ok(())
    }

    #[test]
    fn partial_session_still_tears_down() -> Result<()> {
        let log: Log = Rc::default();
        {
            let mut session = Session::start(Box::new(Recording {
                log: log.clone(),
                fail_init: false,
            }))?;
            session.discover(Duration::ZERO)?;
            assert!(session.streams().is_err());
        }
        assert_eq!(*log.borrow(), vec!["finder", "teardown"]);
        Ok(())
    }

    #[test]
    fn failed_init_skips_teardown() {
        let log: Log = Rc::default();
        let result = Session::start(Box::new(Recording {
            log: log.clone(),
            fail_init: true,
        }));
        assert!(result.is_err());
        assert!(log.borrow().is_empty());
    }
}
