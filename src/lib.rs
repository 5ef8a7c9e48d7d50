//! multitake - record several takes and merge them into one clip.
//!
//! The crate is split along the capture pipeline:
//! - `capture`: camera/microphone discovery and the device session
//! - `recorder`: take-by-take recording and the segment ledger
//! - `merge`: order-preserving concatenation of recorded segments
//! - `facade`: the surface the presentation layer drives

pub mod capture;
pub mod config;
pub mod events;
pub mod facade;
pub mod merge;
pub mod recorder;
pub mod utils;

pub use config::SessionConfig;
pub use events::SessionEvent;
pub use facade::SessionFacade;
pub use merge::{MergeError, MergeOutput, MergeResult};
pub use recorder::{RecorderState, Segment};
pub use utils::error::{AppError, AppResult, ErrorResponse};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default tracing subscriber.
///
/// `RUST_LOG` overrides the filter. Does nothing if a subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "multitake=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::debug!("multitake v{} tracing initialized", env!("CARGO_PKG_VERSION"));
}
