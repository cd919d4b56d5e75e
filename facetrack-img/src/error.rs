use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    /// No points to enclose.
    #[error("Invalid input: bounding box of an empty landmark set is undefined")]
    InvalidInput,

    /// Reference shape collapsed to a line or a point.
    #[error("Degenerate geometry: reference box is {width}x{height}")]
    DegenerateGeometry { width: f32, height: f32 },
}
