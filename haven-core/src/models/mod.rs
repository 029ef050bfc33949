pub mod mood;
pub mod next_session;
pub mod profile;
pub mod session;
pub mod template;

pub use mood::MoodEntry;
pub use next_session::{NextSession, NextSessionStatus};
pub use profile::UserProfile;
pub use session::SessionRecord;
pub use template::TherapyModule;
