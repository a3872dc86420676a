use thiserror::Error;

/// Errors that can occur in CRF layer operations.
#[derive(Debug, Error)]
pub enum CrfError {
    /// The label space has no labels.
    #[error("label space must contain at least one label")]
    EmptyLabelSpace,

    /// A label appears twice in the label list.
    #[error("duplicate label: {0:?}")]
    DuplicateLabel(String),

    /// A label uses one of the reserved sentinel names.
    #[error("label {0:?} is reserved for the transition sentinels")]
    ReservedLabel(String),

    /// A label string is not part of the label space.
    #[error("unknown label: {0:?}")]
    UnknownLabel(String),

    /// A label index does not name a real label.
    #[error("label index {index} is out of range (num_labels = {num_labels})")]
    LabelIndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of real labels.
        num_labels: usize,
    },

    /// Emission or transition dimensions disagree with the label space.
    #[error("label count mismatch in {what}: expected {expected}, got {got}")]
    LabelCountMismatch {
        /// Which tensor carried the wrong dimension.
        what: &'static str,
        /// Number of labels in the label space.
        expected: usize,
        /// Number found in the tensor.
        got: usize,
    },

    /// The number of lengths (or gold sequences) does not match the batch size.
    #[error("batch size mismatch in {what}: expected {expected}, got {got}")]
    BatchSizeMismatch {
        /// Which input carried the wrong count.
        what: &'static str,
        /// Batch size of the emission tensor.
        expected: usize,
        /// Count found.
        got: usize,
    },

    /// A sequence index past the end of the batch.
    #[error("sequence index {sequence} out of range for batch of {batch_size}")]
    SequenceOutOfRange {
        /// Requested batch index.
        sequence: usize,
        /// Number of sequences in the batch.
        batch_size: usize,
    },

    /// The emission batch holds no sequences.
    #[error("emission batch is empty")]
    EmptyBatch,

    /// A sequence length is zero or exceeds the time dimension.
    #[error("sequence {sequence} has invalid length {length} (must be in 1..={max_len})")]
    InvalidLength {
        /// Batch index of the sequence.
        sequence: usize,
        /// The offending length.
        length: usize,
        /// Time dimension of the emission tensor.
        max_len: usize,
    },

    /// A gold sequence does not have exactly one label per real token.
    #[error("gold sequence {sequence} has {got} labels but length is {expected}")]
    GoldLengthMismatch {
        /// Batch index of the sequence.
        sequence: usize,
        /// Declared sequence length.
        expected: usize,
        /// Number of gold labels supplied.
        got: usize,
    },

    /// A gold label index is outside `[0, num_labels)`.
    #[error("gold label {label} at sequence {sequence}, position {position} is out of range (num_labels = {num_labels})")]
    GoldLabelOutOfRange {
        /// Batch index of the sequence.
        sequence: usize,
        /// Token position.
        position: usize,
        /// The offending index.
        label: usize,
        /// Number of real labels.
        num_labels: usize,
    },

    /// A gold path uses a transition fixed at negative infinity.
    #[error("gold sequence {sequence} uses forbidden transition {from} -> {to} at position {position}")]
    ForbiddenTransition {
        /// Batch index of the sequence.
        sequence: usize,
        /// Token position of the target label (`length` for the STOP transition).
        position: usize,
        /// Source label name.
        from: String,
        /// Target label name.
        to: String,
    },

    /// NaN or infinity showed up in a dynamic-programming result.
    #[error("non-finite value {value} in {stage} for sequence {sequence}")]
    NonFinite {
        /// Algorithm that produced the value.
        stage: &'static str,
        /// Batch index of the sequence.
        sequence: usize,
        /// The value itself.
        value: f32,
    },

    /// A learnable transition score is NaN or infinite.
    #[error("non-finite transition score {value} for {from} -> {to}")]
    NonFiniteTransition {
        /// Source index in transition space.
        from: usize,
        /// Target index in transition space.
        to: usize,
        /// The value itself.
        value: f32,
    },

    /// A checkpoint tensor is missing or has the wrong shape.
    #[error("invalid checkpoint: {0}")]
    Checkpoint(String),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CRF operations.
pub type Result<T> = std::result::Result<T, CrfError>;
