//! sqlite3_io_methods implementation for volatile files.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use libsqlite3_sys as ffi;

use super::content::{page_size_is_valid, JOURNAL_MODE};
use super::vfs::VfsState;

/// Engine-side file handle. The engine allocates `szOsFile` bytes and
/// `vfs_open` fills them in; the handle refers to its content by slot
/// index, never by pointer.
#[repr(C)]
pub(crate) struct VfsFile {
    pub(crate) base: ffi::sqlite3_file,
    pub(crate) vfs: *mut VfsState,
    pub(crate) slot: usize,
}

pub(crate) static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 2,
    xClose: Some(file_close),
    xRead: Some(file_read),
    xWrite: Some(file_write),
    xTruncate: Some(file_truncate),
    xSync: Some(file_sync),
    xFileSize: Some(file_size),
    xLock: Some(file_lock),
    xUnlock: Some(file_unlock),
    xCheckReservedLock: Some(file_check_reserved_lock),
    xFileControl: Some(file_control),
    xSectorSize: Some(file_sector_size),
    xDeviceCharacteristics: Some(file_device_characteristics),
    xShmMap: Some(file_shm_map),
    xShmLock: Some(file_shm_lock),
    xShmBarrier: Some(file_shm_barrier),
    xShmUnmap: Some(file_shm_unmap),
    xFetch: None,
    xUnfetch: None,
};

unsafe fn file_state<'a>(file: *mut ffi::sqlite3_file) -> (&'a VfsState, usize) {
    let file = &*(file as *mut VfsFile);
    (&*file.vfs, file.slot)
}

unsafe extern "C" fn file_close(file: *mut ffi::sqlite3_file) -> c_int {
    let (state, slot) = file_state(file);
    state.root().lock().close(slot);
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    if amt <= 0 || offset < 0 {
        return ffi::SQLITE_IOERR_READ;
    }
    let buf = std::slice::from_raw_parts_mut(buf as *mut u8, amt as usize);
    let (state, slot) = file_state(file);
    match state.root().lock().read(slot, buf, offset as u64) {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => err.sqlite_code(),
    }
}

unsafe extern "C" fn file_write(
    file: *mut ffi::sqlite3_file,
    buf: *const c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    if amt <= 0 || offset < 0 {
        return ffi::SQLITE_IOERR_WRITE;
    }
    let data = std::slice::from_raw_parts(buf as *const u8, amt as usize);
    let (state, slot) = file_state(file);
    match state.root().lock().write(slot, data, offset as u64) {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => err.sqlite_code(),
    }
}

unsafe extern "C" fn file_truncate(
    file: *mut ffi::sqlite3_file,
    size: ffi::sqlite3_int64,
) -> c_int {
    if size < 0 {
        return ffi::SQLITE_IOERR_WRITE;
    }
    let (state, slot) = file_state(file);
    match state.root().lock().truncate(slot, size as u64) {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => err.sqlite_code(),
    }
}

unsafe extern "C" fn file_sync(_file: *mut ffi::sqlite3_file, _flags: c_int) -> c_int {
    // Nothing to flush, contents are volatile.
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_size(
    file: *mut ffi::sqlite3_file,
    p_size: *mut ffi::sqlite3_int64,
) -> c_int {
    let (state, slot) = file_state(file);
    *p_size = state.root().lock().file_size(slot) as ffi::sqlite3_int64;
    ffi::SQLITE_OK
}

// Locks are no-ops: no other process has visibility on the files.

unsafe extern "C" fn file_lock(_file: *mut ffi::sqlite3_file, _lock: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_unlock(_file: *mut ffi::sqlite3_file, _lock: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_check_reserved_lock(
    _file: *mut ffi::sqlite3_file,
    p_res_out: *mut c_int,
) -> c_int {
    // Always report the lock as held; only rollback journal mode would
    // care, and that mode is rejected.
    *p_res_out = 1;
    ffi::SQLITE_OK
}

/// Copy `msg` into engine-owned memory. The engine releases pragma error
/// messages with `sqlite3_free`.
unsafe fn pragma_error(out: *mut *mut c_char, msg: &[u8]) {
    *out = ffi::sqlite3_mprintf(
        b"%s\0".as_ptr() as *const c_char,
        msg.as_ptr() as *const c_char,
    );
}

unsafe extern "C" fn file_control(
    file: *mut ffi::sqlite3_file,
    op: c_int,
    p_arg: *mut c_void,
) -> c_int {
    if op != ffi::SQLITE_FCNTL_PRAGMA {
        return ffi::SQLITE_NOTFOUND;
    }

    // For the pragma control, p_arg is an array of three strings: an
    // output slot for the error message, the pragma name and the
    // optional right-hand value.
    let args = p_arg as *mut *mut c_char;
    let left = *args.add(1);
    let right = *args.add(2);
    if left.is_null() || right.is_null() {
        return ffi::SQLITE_NOTFOUND;
    }
    let left = match CStr::from_ptr(left).to_str() {
        Ok(left) => left,
        Err(_) => return ffi::SQLITE_NOTFOUND,
    };
    let right = match CStr::from_ptr(right).to_str() {
        Ok(right) => right,
        Err(_) => return ffi::SQLITE_NOTFOUND,
    };

    if left == "page_size" {
        // Record the requested size so that the first WAL access can see
        // it even before the database header is written. Invalid sizes
        // are ignored, the engine rejects them on its own. Once a size
        // is recorded it cannot change.
        if let Ok(page_size) = right.parse::<usize>() {
            if page_size_is_valid(page_size) {
                let (state, slot) = file_state(file);
                let mut root = state.root().lock();
                let content = root.content_mut(slot);
                if content.page_size() != 0 && content.page_size() != page_size {
                    pragma_error(args, b"changing page size is not supported\0");
                    return ffi::SQLITE_ERROR;
                }
                content.set_page_size(page_size);
            }
        }
    } else if left == "journal_mode" && !right.eq_ignore_ascii_case(JOURNAL_MODE) {
        pragma_error(args, b"only WAL mode is supported\0");
        return ffi::SQLITE_ERROR;
    }

    // Let the engine run its own pragma processing as well.
    ffi::SQLITE_NOTFOUND
}

unsafe extern "C" fn file_sector_size(_file: *mut ffi::sqlite3_file) -> c_int {
    0
}

unsafe extern "C" fn file_device_characteristics(_file: *mut ffi::sqlite3_file) -> c_int {
    0
}

unsafe extern "C" fn file_shm_map(
    file: *mut ffi::sqlite3_file,
    region: c_int,
    region_size: c_int,
    extend: c_int,
    pp: *mut *mut c_void,
) -> c_int {
    if region < 0 || region_size <= 0 {
        return ffi::SQLITE_IOERR;
    }
    let (state, slot) = file_state(file);
    let mut root = state.root().lock();
    match root
        .content_mut(slot)
        .shm_map(region as usize, region_size as usize, extend != 0)
    {
        Ok(Some(ptr)) => {
            *pp = ptr as *mut c_void;
            ffi::SQLITE_OK
        }
        Ok(None) => {
            *pp = ptr::null_mut();
            ffi::SQLITE_OK
        }
        Err(err) => {
            *pp = ptr::null_mut();
            err.sqlite_code()
        }
    }
}

unsafe extern "C" fn file_shm_lock(
    _file: *mut ffi::sqlite3_file,
    _offset: c_int,
    _n: c_int,
    _flags: c_int,
) -> c_int {
    // Shared memory locking only matters across processes.
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_shm_barrier(_file: *mut ffi::sqlite3_file) {}

unsafe extern "C" fn file_shm_unmap(
    file: *mut ffi::sqlite3_file,
    _delete_flag: c_int,
) -> c_int {
    let (state, slot) = file_state(file);
    state.root().lock().content_mut(slot).shm_unmap();
    ffi::SQLITE_OK
}
