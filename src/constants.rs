//! Configuration constants for the quiz duel engine
//!
//! This module contains all the timing windows and limits used
//! throughout the engine, so that every delay and bound lives in
//! one place.

/// Player registry configuration constants
pub mod registry {
    /// Maximum length of a display name in characters
    pub const MAX_NAME_LENGTH: usize = 30;
    /// Maximum number of simultaneously connected players
    pub const MAX_PLAYER_COUNT: usize = 1000;
    /// Maximum number of entries included in a roster broadcast
    pub const ROSTER_LIMIT: usize = 50;
}

/// Challenge negotiation configuration constants
pub mod challenge {
    /// Seconds an unanswered challenge stays live before it expires
    pub const EXPIRY_SECONDS: u64 = 30;
}

/// Match (room) configuration constants
pub mod duel {
    /// Number of questions asked per match
    pub const TOTAL_QUESTIONS: usize = 5;
    /// Grace period in seconds between challenge acceptance and the first question
    pub const START_DELAY_SECONDS: u64 = 2;
    /// Seconds a question stays open for answers
    pub const ANSWER_WINDOW_SECONDS: u64 = 10;
    /// Seconds the round result stays on screen before the next question
    pub const RESULT_DELAY_SECONDS: u64 = 3;
}

/// Scoring configuration constants
pub mod scoring {
    /// Points awarded for the winning correct answer of a round
    pub const CORRECT_POINTS: u64 = 2;
    /// Points awarded when the opponent answered wrong (non-timeout answers only)
    pub const OPPONENT_WRONG_BONUS: u64 = 1;
}

/// Question pool configuration constants
pub mod question {
    /// Minimum number of answer options per question
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of answer options per question
    pub const MAX_OPTION_COUNT: usize = 6;
    /// Maximum length of the question text in characters
    pub const MAX_TEXT_LENGTH: usize = 200;
    /// Maximum length of a single answer option in characters
    pub const MAX_OPTION_LENGTH: usize = 200;
}
