use crate::label::Outcome;
use crate::model::{Image, ModelHandle};
use crate::owner::OwnerId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        Self(NEXT_REQUEST.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Lifecycle of one request. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Created = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
}

impl RequestState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RequestState::Created,
            1 => RequestState::Running,
            2 => RequestState::Succeeded,
            _ => RequestState::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Failed)
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn load(&self) -> RequestState {
        RequestState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `from -> to`; any other current state is a lifecycle bug.
    fn advance(&self, from: RequestState, to: RequestState) {
        if let Err(actual) =
            self.0
                .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            panic!(
                "illegal request transition {:?} -> {to:?} (from {from:?} expected)",
                RequestState::from_u8(actual)
            );
        }
    }
}

type CompleteFn = Box<dyn FnOnce(Outcome) + Send>;
type StartFn = Box<dyn FnOnce() + Send>;

/// Who receives the outcome once the consumer context finishes the request.
enum Completion {
    Owner(OwnerId),
    Callback(CompleteFn),
}

/// One pending classification: model, image and a single-shot completion slot.
///
/// Completion always happens on the consumer context: the executor hands the finished
/// request back through its dispatcher and the context fires the slot there.
pub struct ClassificationRequest {
    id: RequestId,
    model: ModelHandle,
    image: Image,
    state: Arc<StateCell>,
    on_start: Option<StartFn>,
    completion: Option<Completion>,
}

impl ClassificationRequest {
    /// A request whose outcome is passed to `on_complete` on the consumer context.
    pub fn new(
        model: &ModelHandle,
        image: Image,
        on_complete: impl FnOnce(Outcome) + Send + 'static,
    ) -> Self {
        Self::with_completion(model, image, Completion::Callback(Box::new(on_complete)))
    }

    /// A request whose start notice and outcome go to `owner` on the consumer context.
    pub fn for_owner(model: &ModelHandle, image: Image, owner: OwnerId) -> Self {
        Self::with_completion(model, image, Completion::Owner(owner))
    }

    fn with_completion(model: &ModelHandle, image: Image, completion: Completion) -> Self {
        Self {
            id: RequestId::next(),
            model: model.clone(),
            image,
            state: Arc::new(StateCell(AtomicU8::new(RequestState::Created as u8))),
            on_start: None,
            completion: Some(completion),
        }
    }

    /// Called on the submitting thread when the request starts, before scoring is scheduled.
    pub fn on_start(mut self, notice: impl FnOnce() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(notice));
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state.load()
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    /// The owner this request reports to, if it was built with [`Self::for_owner`].
    pub fn owner(&self) -> Option<OwnerId> {
        match self.completion {
            Some(Completion::Owner(owner)) => Some(owner),
            _ => None,
        }
    }

    pub fn handle(&self) -> RequestHandle {
        RequestHandle {
            id: self.id,
            state: Arc::clone(&self.state),
        }
    }

    pub(crate) fn start(&mut self) {
        self.state.advance(RequestState::Created, RequestState::Running);
        if let Some(notice) = self.on_start.take() {
            notice();
        }
    }

    /// Fires the completion slot. A callback runs here and `None` is returned; for an owner
    /// request the owner and outcome are handed back for the caller to resolve. A second call
    /// panics.
    pub(crate) fn complete(&mut self, outcome: Outcome) -> Option<(OwnerId, Outcome)> {
        let Some(completion) = self.completion.take() else {
            panic!("{} completed twice", self.id);
        };
        let next = if outcome.is_success() {
            RequestState::Succeeded
        } else {
            RequestState::Failed
        };
        self.state.advance(RequestState::Running, next);
        match completion {
            Completion::Owner(owner) => Some((owner, outcome)),
            Completion::Callback(on_complete) => {
                on_complete(outcome);
                None
            }
        }
    }
}

impl fmt::Debug for ClassificationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRequest")
            .field("id", &self.id)
            .field("model", &self.model.name())
            .field("image", &self.image)
            .field("state", &self.state())
            .finish()
    }
}

/// Caller-side view of a submitted request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: RequestId,
    state: Arc<StateCell>,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClassifyError, ErrorKind};
    use crate::label::Observation;
    use crate::model::Scorer;
    use image::DynamicImage;
    use std::sync::Mutex;

    struct Never;

    impl Scorer for Never {
        fn score(&self, _image: &DynamicImage) -> Result<Vec<Observation>, ClassifyError> {
            unreachable!()
        }
    }

    fn request(sink: Arc<Mutex<Vec<Outcome>>>) -> ClassificationRequest {
        let model = ModelHandle::from_scorer("never", Never);
        let image = Image::from(DynamicImage::new_rgb8(1, 1));
        ClassificationRequest::new(&model, image, move |o| sink.lock().unwrap().push(o))
    }

    #[test]
    fn ids_are_unique_and_displayed() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let a = request(sink.clone());
        let b = request(sink);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().to_string(), format!("req-{}", a.id().get()));
    }

    #[test]
    fn walks_created_running_completed() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let started = Arc::new(Mutex::new(false));
        let flag = started.clone();
        let mut req = request(sink.clone()).on_start(move || *flag.lock().unwrap() = true);
        let handle = req.handle();

        assert_eq!(handle.state(), RequestState::Created);
        req.start();
        assert!(*started.lock().unwrap());
        assert_eq!(handle.state(), RequestState::Running);

        req.complete(Outcome::failure(ErrorKind::InferenceFailed, "boom"));
        assert_eq!(handle.state(), RequestState::Failed);
        assert!(handle.state().is_completed());
        assert_eq!(sink.lock().unwrap().len(), 1);
    }

    #[test]
    fn owner_request_hands_outcome_back() {
        let model = ModelHandle::from_scorer("never", Never);
        let image = Image::from(DynamicImage::new_rgb8(1, 1));
        let (mut ctx, _dispatcher) = crate::ConsumerContext::new();
        let recorder = std::rc::Rc::new(crate::testing::RecordingOwner::default());
        let owner = ctx.register(&recorder);
        let mut req = ClassificationRequest::for_owner(&model, image, owner);
        assert_eq!(req.owner(), Some(owner));

        req.start();
        let failure = Outcome::failure(ErrorKind::InferenceFailed, "boom");
        assert_eq!(req.complete(failure.clone()), Some((owner, failure)));
        assert_eq!(req.state(), RequestState::Failed);
    }

    #[test]
    fn callback_request_has_no_owner() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut req = request(sink.clone());
        assert_eq!(req.owner(), None);
        req.start();
        assert_eq!(req.complete(Outcome::success(vec![])), None);
        assert_eq!(*sink.lock().unwrap(), vec![Outcome::success(vec![])]);
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn second_completion_panics() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut req = request(sink);
        req.start();
        req.complete(Outcome::success(vec![]));
        req.complete(Outcome::success(vec![]));
    }

    #[test]
    #[should_panic(expected = "illegal request transition")]
    fn completing_before_start_panics() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut req = request(sink);
        req.complete(Outcome::failure(ErrorKind::InferenceFailed, "early"));
    }
}
