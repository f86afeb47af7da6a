use std::os::unix::prelude::PermissionsExt;

use crate::error::Error;
use crate::state::SharedPullerState;

fn remove_temp(state: &SharedPullerState) {
    if !state.created_temp() {
        // whatever sits at the temp path belongs to someone else
        return;
    }
    match std::fs::remove_file(state.temp_name()) {
        Ok(()) => tracing::debug!("removed temp file {:?}", state.temp_name()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => tracing::warn!(
            "failed removing temp file {:?}: {}",
            state.temp_name(),
            error
        ),
    }
}

fn apply_metadata_and_rename(state: &SharedPullerState) -> Result<(), Error> {
    let file = state.file();
    let temp = state.temp_name();
    std::fs::set_permissions(temp, std::fs::Permissions::from_mode(file.mode & 0o777))
        .map_err(|error| Error::finish("set permissions", temp, error))?;
    filetime::set_file_mtime(temp, filetime::FileTime::from_system_time(file.modified))
        .map_err(|error| Error::finish("set mtime", temp, error))?;
    std::fs::rename(temp, state.real_name())
        .map_err(|error| Error::finish("rename", temp, error))?;
    Ok(())
}

/// Moves a fully reconstructed temp file into place.
///
/// `close` is the result handed to the responsible caller of
/// [`SharedPullerState::final_close`]. On any error the real file is left as it was and the temp
/// file is removed, unless it was never created by this transfer.
pub fn finish(state: &SharedPullerState, close: Result<(), Error>) -> Result<(), Error> {
    if let Err(error) = close {
        remove_temp(state);
        return Err(error);
    }
    if let Err(error) = apply_metadata_and_rename(state) {
        state.report("finish", &error);
        remove_temp(state);
        return Err(error);
    }
    tracing::debug!("finished {:?}", state.real_name());
    Ok(())
}
