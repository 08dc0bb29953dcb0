//! # themex-cluster
//!
//! Synchronous, CPU-bound clustering primitives over `&[Vec<f32>]`.
//!
//! - [`kmeans`] / [`kmeans_plus_plus_init`]: seeded Lloyd iteration
//! - [`select_k`]: elbow plus cohesion/separation choice of k
//! - [`bisect`]: Davies–Bouldin-gated bisecting splits
//! - [`merge_near_duplicates`] / [`merge_to_at_most`]: diversity merging
//! - [`agglomerate`]: gated average-linkage agglomeration
//! - [`weighted_pagerank`]: power-iteration PageRank
//! - [`metrics`]: centroid, SSE, cohesion, separation, Davies–Bouldin, ICI

#![deny(unsafe_code)]

pub mod adaptive;
pub mod agglomerative;
pub mod bisect;
pub mod kmeans;
pub mod merge;
pub mod metrics;
pub mod pagerank;

pub use adaptive::{AdaptiveKConfig, KCandidate, KSelection, select_k};
pub use agglomerative::{AgglomerativeConfig, agglomerate};
pub use bisect::{BisectConfig, bisect};
pub use kmeans::{Clustering, KMeansConfig, kmeans, kmeans_plus_plus_init, nearest_centroid};
pub use merge::{Candidate, merge_near_duplicates, merge_to_at_most};
pub use pagerank::{PageRankConfig, PageRankResult, weighted_pagerank};
