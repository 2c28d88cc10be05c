//! Vision Primitives
//!
//! This module contains the in-memory frame representation and the image
//! math the processors are built on:
//!
//! - [`Frame`]: 8-bit BGR image in HWC layout backed by `ndarray`
//! - image file decode/encode ([`io`])
//! - affine estimation from 5-point landmarks, face warping and paste-back
//!   ([`warp`])
//! - separable Gaussian blur and plane resize for float masks ([`blur`])
//! - overlap tiling for super-resolution models ([`tile`])
//! - tensor layout conversions between frames and model I/O ([`tensor`])

mod blur;
mod frame;
pub mod io;
pub mod tensor;
pub mod tile;
pub mod warp;

pub use blur::{gaussian_blur, resize_plane};
pub use frame::Frame;
