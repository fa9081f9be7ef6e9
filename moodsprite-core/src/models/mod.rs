pub mod character;
pub mod cue;
pub mod interaction;
pub mod session;

pub use character::{
    CharacterVersionView, CharacterView, HistoryQuery, HistoryView, SpriteCharacter,
    SpriteCharacterHistory, SpriteCharacterVersion, SpriteKeyframe, SpriteMood,
};
pub use cue::{Cue, CueError, Diagnostic, LiveCue};
pub use interaction::InteractionLog;
pub use session::RelaySession;
