use std::fs::File;

use crate::core::error::{Error, Result};

#[cfg(unix)]
pub fn flock_exclusive(file: &File) -> Result<()> {
    use libc::{flock, LOCK_EX, LOCK_NB};
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc != 0 {
        return Err(Error::busy(
            "index_location is already locked by another writer",
        ));
    }
    Ok(())
}

#[cfg(unix)]
pub fn flock_unlock(file: &File) -> Result<()> {
    use libc::{flock, LOCK_UN};
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    unsafe {
        flock(fd, LOCK_UN);
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn flock_exclusive(_file: &File) -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn flock_unlock(_file: &File) -> Result<()> {
    Ok(())
}
