// SPDX-License-Identifier: MPL-2.0

mod session;
pub mod settings;

pub use session::{CamelSession, SessionError, SessionManager, StoredSession};
pub use settings::{AnalyticsSettings, EngineSettings, SyncSettings};
