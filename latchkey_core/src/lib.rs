pub mod adapter;
pub mod config;
pub mod corpus;
pub mod driver;
pub mod mutator;
pub mod oracle;
pub mod payload;
pub mod recovery;
pub mod schedule;
pub mod state;
pub mod store;

pub use adapter::{
    ErrorKind, ExecutionError, ExecutionResult, HttpAdapter, HttpResponse, Recovery,
    SessionAdapter, SessionTransport, TargetAdapter, TransportError,
};
pub use config::{LatchkeyConfig, TargetSelector};
pub use corpus::{CorpusError, SeedCorpus};
pub use driver::{CampaignDriver, CampaignReport};
pub use mutator::{MutationOperator, OperatorSet, endpoint_operators, session_operators};
pub use oracle::{EndpointOracle, LockOracle, Oracle};
pub use payload::{ProductRecord, ProtocolState, SeedPayload, SessionSeed, StateMatch, TestCase};
pub use recovery::RecoveryManager;
pub use schedule::PowerSchedule;
pub use state::{LockStateTracker, StateTracker};
pub use store::{FailureRecord, FailureStatus, ResultStore, StoreError, StoreSummary};
