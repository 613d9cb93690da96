// gitfix - autonomous GitHub issue resolution.
// Discovery daemon, durable Redis task queue, and a per-issue pipeline that
// drives an external coding agent inside an isolated git worktree.

pub mod agent;
pub mod config;
pub mod daemon;
pub mod git;
pub mod github;
pub mod pipeline;
pub mod queue;
pub mod shutdown;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use agent::{AgentAdapter, AgentError, AgentEvent, AgentOutcome, AgentRequest, FinalResult};
pub use config::{ConfigLoader, EnvConfig, GitfixConfig, RepoConfig, RetentionStrategy, Settings};
pub use daemon::{CommentFilter, DiscoveryDaemon, KeywordMatcher};
pub use git::{CleanupOptions, CommitOutcome, WorkspaceManager, Worktree};
pub use github::{GitHubClient, GitHubError, IssueRef, IssueView, PullRequestView, WorkItemKind};
pub use pipeline::{PipelineOptions, TaskPipeline};
pub use queue::{Job, JobHandler, JobPayload, TaskQueue, WorkerPool};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use store::{TaskFilter, TaskState, TaskStateStore};
pub use telemetry::{generate_correlation_id, init_telemetry};
