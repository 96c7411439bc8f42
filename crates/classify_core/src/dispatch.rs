//! Hand-off of notifications from worker threads to the consumer context.

use crate::label::Outcome;
use crate::owner::{Owner, OwnerId, OwnerRegistry};
use crate::request::{ClassificationRequest, RequestId};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use tracing::{debug, warn};

/// Message crossing from any thread to the consumer context.
#[derive(Debug)]
pub enum ConsumerEvent {
    Started {
        owner: OwnerId,
        request: RequestId,
    },
    Completed {
        owner: OwnerId,
        /// `None` for notifications not tied to a request, such as a failed model load.
        request: Option<RequestId>,
        outcome: Outcome,
    },
    /// A scored request whose completion slot fires on the consumer context.
    Finished {
        request: Box<ClassificationRequest>,
        outcome: Outcome,
    },
}

/// What happened to one event once the consumer context processed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Started {
        owner: OwnerId,
        request: RequestId,
    },
    Delivered {
        owner: OwnerId,
        request: Option<RequestId>,
    },
    /// The owner was released first; the event was dropped.
    OwnerGone {
        owner: OwnerId,
        request: Option<RequestId>,
    },
    /// A request's own completion callback ran.
    Called { request: RequestId },
}

impl Delivery {
    pub fn request(&self) -> Option<RequestId> {
        match self {
            Delivery::Started { request, .. } | Delivery::Called { request } => Some(*request),
            Delivery::Delivered { request, .. } | Delivery::OwnerGone { request, .. } => *request,
        }
    }
}

/// Sending half; cheap to clone and usable from any thread.
#[derive(Debug, Clone)]
pub struct ResultDispatcher {
    tx: Sender<ConsumerEvent>,
}

impl ResultDispatcher {
    pub fn notify_started(&self, owner: OwnerId, request: RequestId) {
        self.send(ConsumerEvent::Started { owner, request });
    }

    /// Queues `outcome` for `owner`. The owner is looked up only when the consumer context
    /// processes the event, never here.
    pub fn deliver(&self, owner: OwnerId, request: Option<RequestId>, outcome: Outcome) {
        self.send(ConsumerEvent::Completed {
            owner,
            request,
            outcome,
        });
    }

    /// Hands a scored request back so its completion fires on the consumer context.
    pub(crate) fn finish(&self, request: ClassificationRequest, outcome: Outcome) {
        self.send(ConsumerEvent::Finished {
            request: Box::new(request),
            outcome,
        });
    }

    fn send(&self, event: ConsumerEvent) {
        if let Err(mpsc::SendError(event)) = self.tx.send(event) {
            debug!("consumer context closed; dropping {:?}", event);
        }
    }
}

/// The serial context all owner notifications run on.
///
/// Owners are registered here and never leave it; the type is not `Send`, so events are
/// processed on the thread that created it.
pub struct ConsumerContext {
    rx: Receiver<ConsumerEvent>,
    registry: OwnerRegistry,
}

impl ConsumerContext {
    pub fn new() -> (Self, ResultDispatcher) {
        let (tx, rx) = mpsc::channel();
        let ctx = Self {
            rx,
            registry: OwnerRegistry::new(),
        };
        (ctx, ResultDispatcher { tx })
    }

    pub fn register<O: Owner + 'static>(&mut self, owner: &Rc<O>) -> OwnerId {
        let id = self.registry.register(owner);
        debug!("registered {id}");
        id
    }

    /// Explicit teardown; later events for `id` are dropped like those for a released owner.
    pub fn unregister(&mut self, id: OwnerId) {
        if self.registry.unregister(id) {
            debug!("unregistered {id}");
        }
    }

    pub fn registry(&self) -> &OwnerRegistry {
        &self.registry
    }

    /// Waits up to `timeout` for one event and delivers it.
    pub fn process_next(&mut self, timeout: Duration) -> Option<Delivery> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(self.handle(event)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Delivers everything already queued without blocking.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => out.push(self.handle(event)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return out,
            }
        }
    }

    /// Processes events until every dispatcher has been dropped.
    pub fn run(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.rx.recv() {
            self.handle(event);
            processed += 1;
        }
        processed
    }

    fn handle(&mut self, event: ConsumerEvent) -> Delivery {
        match event {
            ConsumerEvent::Started { owner, request } => match self.registry.resolve(owner) {
                Some(target) => {
                    target.on_progress_start();
                    Delivery::Started { owner, request }
                }
                None => {
                    debug!("{owner} is gone; skipping start notice for {request}");
                    Delivery::OwnerGone {
                        owner,
                        request: Some(request),
                    }
                }
            },
            ConsumerEvent::Completed {
                owner,
                request,
                outcome,
            } => self.deliver_result(owner, request, outcome),
            ConsumerEvent::Finished {
                mut request,
                outcome,
            } => {
                let id = request.id();
                match request.complete(outcome) {
                    Some((owner, outcome)) => self.deliver_result(owner, Some(id), outcome),
                    None => Delivery::Called { request: id },
                }
            }
        }
    }

    fn deliver_result(
        &mut self,
        owner: OwnerId,
        request: Option<RequestId>,
        outcome: Outcome,
    ) -> Delivery {
        match self.registry.resolve(owner) {
            Some(target) => {
                target.on_result(outcome);
                Delivery::Delivered { owner, request }
            }
            None => {
                if let Outcome::Failure { kind, message } = &outcome {
                    warn!("{owner} is gone; dropping {kind} failure: {message}");
                } else {
                    debug!("{owner} is gone; dropping outcome of {request:?}");
                }
                Delivery::OwnerGone { owner, request }
            }
        }
    }
}
