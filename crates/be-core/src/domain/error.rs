// ---------------------------------------------------------------------------
// Bot agent errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("unknown bot agent {name}; known agents: {known}")]
    UnknownAgent { name: String, known: String },
    #[error("invalid arguments for bot agent {agent}: {reason}")]
    InvalidArgs { agent: String, reason: String },
    #[error("bot backend returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("bot backend connection failed: {0}")]
    Connection(String),
    #[error("bot backend returned an unusable reply: {0}")]
    InvalidResponse(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
