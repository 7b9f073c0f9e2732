use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Number of elements implied by a shape does not match the backing storage.
    #[snafu(display("size mismatch: shape {shape:?} needs {expected} elements, storage holds {actual}"))]
    SizeMismatch { shape: Vec<usize>, expected: usize, actual: usize },
}
