mod notice;
mod state;
mod transcript;

pub use notice::{Notice, NoticeKind};
pub use state::{AnalysisCall, Phase, SessionState, Turn};
pub use transcript::{append_follow_up, follow_up_section};
