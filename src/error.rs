use thiserror::Error as ThisError;

use crate::object::Object;
use crate::token::Token;

/// `Return`/`Break` are not user-visible failures — they are the typed
/// non-local control transfer the book models as a thrown exception, reused
/// here as an ordinary `Err` so they unwind through `execute_block` the same
/// way a genuine runtime error does (and restore the environment the same
/// way).
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("parse error")]
    Parse,

    #[error("{message}")]
    Runtime { token: Token, message: String },

    #[error("return")]
    Return { value: Object },

    #[error("break outside loop")]
    Break,
}
