//! # nercrf Core
//!
//! A linear-chain conditional random field layer for named-entity
//! recognition. Given per-token emission scores from any encoder, it computes
//! the training loss (negative log-likelihood through the forward algorithm)
//! and decodes the best label path with Viterbi. Tensors are `candle` tensors,
//! so the loss backpropagates into both the encoder output and the learned
//! transition matrix.
//!
//! ## Quick Start
//!
//! ```rust
//! use candle_core::Device;
//! use nercrf_core::{Crf, CrfConfig, EmissionBatch, LabelSpace, TransitionMatrix};
//! use nercrf_core::config::TransitionConstraints;
//!
//! let labels = LabelSpace::new(vec!["O".into(), "X".into()]).unwrap();
//! let transitions =
//!     TransitionMatrix::zeros(&labels, TransitionConstraints::Sentinels, &Device::Cpu).unwrap();
//! let crf = Crf::with_transitions(&labels, transitions, CrfConfig::default()).unwrap();
//!
//! let batch = EmissionBatch::from_sequences(
//!     &[vec![vec![1.0, 2.0], vec![3.0, 1.0]]],
//!     labels.len(),
//!     &Device::Cpu,
//! )
//! .unwrap();
//!
//! let decoded = crf.decode(&batch).unwrap();
//! assert_eq!(labels.decode(&decoded[0].labels).unwrap(), vec!["X", "O"]);
//! assert_eq!(decoded[0].score, 5.0);
//!
//! let loss = crf.neg_log_likelihood(&batch, &[vec![1, 0]]).unwrap();
//! assert!(loss.to_scalar::<f32>().unwrap() > 0.0);
//! ```
pub mod config;
pub mod crf;
pub mod error;
pub mod eval;
pub mod labels;

// Re-export primary API
pub use config::{CrfConfig, PaddingStrategy, TransitionConstraints};
pub use crf::{Checkpoint, Crf, DecodedPath, EmissionBatch, TransitionMatrix, ViterbiDecoder};
pub use error::{CrfError, Result};
pub use eval::{Span, SpanCounts, SpanMetrics};
pub use labels::{LabelSpace, Scheme, bio_to_iobes};
