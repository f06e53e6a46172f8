use crate::error::FrameError;

/// Allocates a default-filled buffer, reporting exhaustion instead of aborting.
pub fn try_filled<T: Clone + Default>(len: usize) -> Result<Vec<T>, FrameError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| FrameError::Allocation {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}
