//! sqlite3_vfs registration and the VFS-level callbacks.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use libsqlite3_sys as ffi;
use parking_lot::Mutex;
use rand::RngCore;

use super::content::{FileKind, Root, MAX_PATHNAME};
use super::file::{VfsFile, IO_METHODS};
use crate::error::{Error, Result};

/// Counter handing out VFS identifiers across registrations.
static NEXT_VFS_ID: AtomicI32 = AtomicI32::new(0);

/// State backing one registered VFS: the name the engine knows it by and
/// the root of the in-memory file table.
pub(crate) struct VfsState {
    name: CString,
    root: Mutex<Root>,
}

impl VfsState {
    pub(crate) fn name(&self) -> &CStr {
        &self.name
    }

    pub(crate) fn root(&self) -> &Mutex<Root> {
        &self.root
    }
}

/// The raw pointers produced by a successful registration. Both stay
/// alive until `unregister` reclaims them.
pub(crate) struct Registration {
    pub(crate) vfs: *mut ffi::sqlite3_vfs,
    pub(crate) state: *mut VfsState,
}

/// Register a new volatile VFS with the engine under `name`.
pub(crate) fn register(name: &str) -> Result<Registration> {
    let c_name =
        CString::new(name).map_err(|_| Error::InvalidName(name.to_owned()))?;
    let vfs_id = NEXT_VFS_ID.fetch_add(1, Ordering::Relaxed);
    let state = Box::into_raw(Box::new(VfsState {
        name: c_name,
        root: Mutex::new(Root::new(vfs_id)),
    }));

    let vfs = Box::into_raw(Box::new(ffi::sqlite3_vfs {
        iVersion: 2,
        szOsFile: std::mem::size_of::<VfsFile>() as c_int,
        mxPathname: MAX_PATHNAME as c_int,
        pNext: ptr::null_mut(),
        zName: unsafe { (*state).name.as_ptr() },
        pAppData: state as *mut c_void,
        xOpen: Some(vfs_open),
        xDelete: Some(vfs_delete),
        xAccess: Some(vfs_access),
        xFullPathname: Some(vfs_full_pathname),
        xDlOpen: Some(vfs_dl_open),
        xDlError: Some(vfs_dl_error),
        xDlSym: Some(vfs_dl_sym),
        xDlClose: Some(vfs_dl_close),
        xRandomness: Some(vfs_randomness),
        xSleep: Some(vfs_sleep),
        xCurrentTime: Some(vfs_current_time),
        xGetLastError: Some(vfs_get_last_error),
        xCurrentTimeInt64: Some(vfs_current_time_int64),
        xSetSystemCall: None,
        xGetSystemCall: None,
        xNextSystemCall: None,
    }));

    let rc = unsafe { ffi::sqlite3_vfs_register(vfs, 0) };
    if rc != ffi::SQLITE_OK {
        unsafe {
            drop(Box::from_raw(vfs));
            drop(Box::from_raw(state));
        }
        return Err(Error::Engine(rc));
    }

    Ok(Registration { vfs, state })
}

/// Unregister a VFS and reclaim its state. All file content is dropped,
/// so dangling handles against those files are broken.
pub(crate) fn unregister(registration: Registration) -> Result<()> {
    let rc = unsafe { ffi::sqlite3_vfs_unregister(registration.vfs) };
    unsafe {
        drop(Box::from_raw(registration.vfs));
        drop(Box::from_raw(registration.state));
    }
    if rc != ffi::SQLITE_OK {
        return Err(Error::Engine(rc));
    }
    Ok(())
}

unsafe fn state_of<'a>(vfs: *mut ffi::sqlite3_vfs) -> &'a VfsState {
    &*((*vfs).pAppData as *const VfsState)
}

/// Infer what a file will hold from the engine's open flags.
fn kind_from_flags(flags: c_int) -> FileKind {
    if flags & ffi::SQLITE_OPEN_MAIN_DB != 0 {
        FileKind::MainDb
    } else if flags & ffi::SQLITE_OPEN_WAL != 0 {
        FileKind::Wal
    } else {
        FileKind::Other
    }
}

pub(crate) unsafe extern "C" fn vfs_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    let file = file as *mut VfsFile;

    // A null methods pointer tells the engine not to call Close when the
    // open fails.
    (*file).base.pMethods = ptr::null();

    // Anonymous temporary files are not supported.
    if z_name.is_null() {
        return ffi::SQLITE_CANTOPEN;
    }
    let name = match CStr::from_ptr(z_name).to_str() {
        Ok(name) => name,
        Err(_) => return ffi::SQLITE_CANTOPEN,
    };

    let state = state_of(vfs);
    let create = flags & ffi::SQLITE_OPEN_CREATE != 0;
    let exclusive = flags & ffi::SQLITE_OPEN_EXCLUSIVE != 0;

    let mut root = state.root().lock();
    match root.open(name, create, exclusive, kind_from_flags(flags)) {
        Ok(slot) => {
            (*file).vfs = (*vfs).pAppData as *mut VfsState;
            (*file).slot = slot;
            (*file).base.pMethods = &IO_METHODS;
            if !p_out_flags.is_null() {
                *p_out_flags = flags;
            }
            ffi::SQLITE_OK
        }
        Err(err) => err.sqlite_code(),
    }
}

unsafe extern "C" fn vfs_delete(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _sync_dir: c_int,
) -> c_int {
    let name = match CStr::from_ptr(z_name).to_str() {
        Ok(name) => name,
        Err(_) => return ffi::SQLITE_IOERR_DELETE,
    };
    let state = state_of(vfs);
    match state.root().lock().delete(name) {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => err.sqlite_code(),
    }
}

unsafe extern "C" fn vfs_access(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _flags: c_int,
    p_res_out: *mut c_int,
) -> c_int {
    let name = match CStr::from_ptr(z_name).to_str() {
        Ok(name) => name,
        Err(_) => return ffi::SQLITE_ERROR,
    };
    let state = state_of(vfs);
    let exists = state.root().lock().access(name);
    *p_res_out = exists as c_int;
    ffi::SQLITE_OK
}

unsafe extern "C" fn vfs_full_pathname(
    _vfs: *mut ffi::sqlite3_vfs,
    z_path: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    // The file system is flat, so pathnames pass through unchanged.
    let len = CStr::from_ptr(z_path).to_bytes_with_nul().len();
    if len > n_out as usize {
        return ffi::SQLITE_CANTOPEN;
    }
    ptr::copy_nonoverlapping(z_path, z_out, len);
    ffi::SQLITE_OK
}

unsafe extern "C" fn vfs_dl_open(
    _vfs: *mut ffi::sqlite3_vfs,
    _z_path: *const c_char,
) -> *mut c_void {
    ptr::null_mut()
}

unsafe extern "C" fn vfs_dl_error(
    _vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_err_msg: *mut c_char,
) {
    let msg = b"Loadable extensions are not supported\0";
    if n_byte <= 0 {
        return;
    }
    let len = msg.len().min(n_byte as usize);
    ptr::copy_nonoverlapping(msg.as_ptr() as *const c_char, z_err_msg, len);
    *z_err_msg.add(len - 1) = 0;
}

unsafe extern "C" fn vfs_dl_sym(
    _vfs: *mut ffi::sqlite3_vfs,
    _handle: *mut c_void,
    _z_symbol: *const c_char,
) -> Option<unsafe extern "C" fn(*mut ffi::sqlite3_vfs, *mut c_void, *const c_char)> {
    None
}

unsafe extern "C" fn vfs_dl_close(_vfs: *mut ffi::sqlite3_vfs, _handle: *mut c_void) {}

unsafe extern "C" fn vfs_randomness(
    _vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_out: *mut c_char,
) -> c_int {
    if n_byte <= 0 {
        return 0;
    }
    let buf = std::slice::from_raw_parts_mut(z_out as *mut u8, n_byte as usize);
    rand::thread_rng().fill_bytes(buf);
    n_byte
}

unsafe extern "C" fn vfs_sleep(_vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    // Blocks the calling thread only; the engine call stays preemptible
    // for the rest of the host.
    std::thread::sleep(Duration::from_micros(microseconds.max(0) as u64));
    microseconds
}

fn since_unix_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

unsafe extern "C" fn vfs_current_time(
    _vfs: *mut ffi::sqlite3_vfs,
    p_time_out: *mut f64,
) -> c_int {
    // Julian day number; 2440587.5 is the Julian day of the Unix epoch.
    *p_time_out = 2440587.5 + since_unix_epoch().as_secs_f64() / 86400.0;
    ffi::SQLITE_OK
}

unsafe extern "C" fn vfs_current_time_int64(
    _vfs: *mut ffi::sqlite3_vfs,
    p_time_out: *mut ffi::sqlite3_int64,
) -> c_int {
    // Milliseconds since the Julian epoch.
    const UNIX_EPOCH_JULIAN_MS: i64 = 24405875 * 8640000;
    *p_time_out = UNIX_EPOCH_JULIAN_MS + since_unix_epoch().as_millis() as i64;
    ffi::SQLITE_OK
}

unsafe extern "C" fn vfs_get_last_error(
    vfs: *mut ffi::sqlite3_vfs,
    _n_byte: c_int,
    _z_err_msg: *mut c_char,
) -> c_int {
    state_of(vfs).root().lock().errno()
}
