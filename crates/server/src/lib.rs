pub mod db;
pub mod fetch;
pub mod merge;
pub mod models;
pub mod poller;
pub mod providers;
pub mod rate_limit;
pub mod routes;
pub mod service;
pub mod startup;
pub mod utils;

pub use db::{SqliteStore, StoreError, WeatherReader, WeatherStore};
pub use fetch::{fetch_with_retry, FetchError, HttpTransport, RetryPolicy, Transport};
pub use merge::{assess, merge, CompositeView, FlightAssessment, FlightRating};
pub use models::{LocationKey, NormalizedRecord, ProviderKind, WindField};
pub use poller::Poller;
pub use providers::{Provider, Site};
pub use rate_limit::{RateBudget, RateLimiter};
pub use service::{build_providers, read_composite, ServiceError, WeatherService};
pub use startup::{app, build_app_state, AppState};
pub use utils::{get_config_info, get_log_level, setup_logger, Cli, Tuning};
