pub mod batch;
pub mod dispatcher;
pub mod events;
pub mod handler;
pub mod model;
pub mod queue;
pub mod repo;
pub mod result;
pub mod service;

pub use dispatcher::EventDispatcher;
pub use events::JobEvent;
pub use handler::JobEventHandler;
pub use model::ValidationJob;
pub use queue::JobQueueProducer;
pub use repo::JobRepo;
pub use result::{JobResult, MessageTag, ResultStatus};
pub use service::JobService;
