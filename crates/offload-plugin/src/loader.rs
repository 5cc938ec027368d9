use std::ffi::{c_char, c_int, c_void, CStr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use offload_abi::{DeviceCapabilities, OffloadImageTable};

use crate::error::PluginError;
use crate::plugin::{AddrPair, DevicePlugin};

/// Fixed symbol prefix every plugin export carries, e.g. `GOMP_OFFLOAD_alloc`.
const SYMBOL_PREFIX: &str = "GOMP_OFFLOAD_";

/// Host-side plugin ABI version; a plugin whose `version()` exceeds this is
/// rejected rather than loaded.
pub const HOST_VERSION: u32 = 1;

type FnVersion = unsafe extern "C" fn() -> c_int;
type FnGetName = unsafe extern "C" fn() -> *const c_char;
type FnGetCaps = unsafe extern "C" fn() -> c_int;
type FnGetType = unsafe extern "C" fn() -> *const c_char;
type FnGetNumDevices = unsafe extern "C" fn() -> c_int;
type FnInitDevice = unsafe extern "C" fn(c_int) -> c_int;
type FnFiniDevice = unsafe extern "C" fn(c_int) -> c_int;
type FnAlloc = unsafe extern "C" fn(c_int, usize) -> u64;
type FnFree = unsafe extern "C" fn(c_int, u64) -> c_int;
type FnHostToDev = unsafe extern "C" fn(c_int, u64, *const c_void, usize) -> c_int;
type FnDevToHost = unsafe extern "C" fn(c_int, *mut c_void, u64, usize) -> c_int;
type FnDevToDev = unsafe extern "C" fn(c_int, u64, u64, usize) -> c_int;
type FnRun = unsafe extern "C" fn(c_int, u64, u64) -> c_int;

/// A device plugin bound from a shared library on disk.
///
/// This is the only place in the crate that speaks `dlopen`/`dlsym`:
/// everything else in the workspace talks to [`DevicePlugin`].
pub struct DlopenPlugin {
    _library: Library,
    name: String,
    device_type: String,
    version: u32,
    capabilities: DeviceCapabilities,
    num_devices: u32,
    init_device: FnInitDevice,
    fini_device: FnFiniDevice,
    alloc: FnAlloc,
    free: FnFree,
    host_to_dev: FnHostToDev,
    dev_to_host: FnDevToHost,
    dev_to_dev: Option<FnDevToDev>,
    run: Option<FnRun>,
}

impl DlopenPlugin {
    /// # Safety
    /// `path` must name a shared library that implements the
    /// `GOMP_OFFLOAD_*` symbol convention this loader resolves by name.
    /// Loading and calling into an arbitrary library is inherently unsafe.
    unsafe fn load(path: &Path) -> Result<Self, PluginError> {
        let library =
            unsafe { Library::new(path) }.map_err(|e| PluginError::Load(format!("{}: {e}", path.display())))?;

        macro_rules! symbol {
            ($ty:ty, $name:literal) => {{
                let full = format!("{SYMBOL_PREFIX}{}", $name);
                *unsafe { library.get::<$ty>(full.as_bytes()) }
                    .map_err(|_| PluginError::MissingSymbol($name))?
            }};
        }

        let version_fn: FnVersion = unsafe { symbol!(FnVersion, "version") };
        let get_name: FnGetName = unsafe { symbol!(FnGetName, "get_name") };
        let get_caps: FnGetCaps = unsafe { symbol!(FnGetCaps, "get_caps") };
        let get_type: FnGetType = unsafe { symbol!(FnGetType, "get_type") };
        let get_num_devices: FnGetNumDevices = unsafe { symbol!(FnGetNumDevices, "get_num_devices") };
        let init_device: FnInitDevice = unsafe { symbol!(FnInitDevice, "init_device") };
        let fini_device: FnFiniDevice = unsafe { symbol!(FnFiniDevice, "fini_device") };
        let alloc: FnAlloc = unsafe { symbol!(FnAlloc, "alloc") };
        let free: FnFree = unsafe { symbol!(FnFree, "free") };
        let host_to_dev: FnHostToDev = unsafe { symbol!(FnHostToDev, "host2dev") };
        let dev_to_host: FnDevToHost = unsafe { symbol!(FnDevToHost, "dev2host") };

        let version = unsafe { version_fn() } as u32;
        if version > HOST_VERSION {
            return Err(PluginError::VersionMismatch { plugin: version, host: HOST_VERSION });
        }

        let capabilities = DeviceCapabilities::from_bits(unsafe { get_caps() } as u32);

        let (dev_to_dev, run) = if capabilities.contains(DeviceCapabilities::COMPUTE_LAUNCH) {
            let dev_to_dev: FnDevToDev = unsafe { symbol!(FnDevToDev, "dev2dev") };
            let run: FnRun = unsafe { symbol!(FnRun, "run") };
            (Some(dev_to_dev), Some(run))
        } else {
            (None, None)
        };

        let name = unsafe { c_str_to_string(get_name()) };
        let device_type = unsafe { c_str_to_string(get_type()) };
        let num_devices = unsafe { get_num_devices() } as u32;

        Ok(Self {
            _library: library,
            name,
            device_type,
            version,
            capabilities,
            num_devices,
            init_device,
            fini_device,
            alloc,
            free,
            host_to_dev,
            dev_to_host,
            dev_to_dev,
            run,
        })
    }
}

unsafe fn c_str_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

impl DevicePlugin for DlopenPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn num_devices(&self) -> u32 {
        self.num_devices
    }

    fn init_device(&self, target_id: i32) -> Result<(), PluginError> {
        if unsafe { (self.init_device)(target_id) } == 0 {
            Ok(())
        } else {
            Err(PluginError::InitFailed { target_id })
        }
    }

    fn fini_device(&self, target_id: i32) -> Result<(), PluginError> {
        let _ = unsafe { (self.fini_device)(target_id) };
        Ok(())
    }

    fn load_image(&self, _target_id: i32, _version: u32, _table: &OffloadImageTable) -> Result<Vec<AddrPair>, PluginError> {
        // Real plugins export a dedicated `load_image` entry point with a
        // richer signature (opaque target-data blob in, addr-pair array
        // out) than the fixed-arity symbols above; binding it requires the
        // vendor's image format, which this host-side crate does not define.
        // Plugins that only need the in-process test surface should
        // implement `DevicePlugin` directly instead of going through
        // `DlopenPlugin`.
        Err(PluginError::Unsupported("load_image over dlopen"))
    }

    fn unload_image(&self, _target_id: i32, _version: u32) -> Result<(), PluginError> {
        Err(PluginError::Unsupported("unload_image over dlopen"))
    }

    fn alloc(&self, target_id: i32, size: u64) -> Result<u64, PluginError> {
        let addr = unsafe { (self.alloc)(target_id, size as usize) };
        if addr == 0 {
            Err(PluginError::AllocFailed { target_id, size })
        } else {
            Ok(addr)
        }
    }

    fn free(&self, target_id: i32, addr: u64) -> Result<(), PluginError> {
        if unsafe { (self.free)(target_id, addr) } == 0 {
            Ok(())
        } else {
            Err(PluginError::Transfer(format!("free({addr:#x}) failed on device {target_id}")))
        }
    }

    fn host_to_dev(&self, target_id: i32, dst: u64, src: &[u8]) -> Result<(), PluginError> {
        let rc = unsafe { (self.host_to_dev)(target_id, dst, src.as_ptr().cast(), src.len()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(PluginError::Transfer(format!("host2dev({dst:#x}, {} bytes) failed", src.len())))
        }
    }

    fn dev_to_host(&self, target_id: i32, dst: &mut [u8], src: u64) -> Result<(), PluginError> {
        let rc = unsafe { (self.dev_to_host)(target_id, dst.as_mut_ptr().cast(), src, dst.len()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(PluginError::Transfer(format!("dev2host({src:#x}, {} bytes) failed", dst.len())))
        }
    }

    fn dev_to_dev(&self, target_id: i32, dst: u64, src: u64, len: u64) -> Result<(), PluginError> {
        let f = self.dev_to_dev.ok_or(PluginError::Unsupported("dev2dev"))?;
        if unsafe { f(target_id, dst, src, len as usize) } == 0 {
            Ok(())
        } else {
            Err(PluginError::Transfer(format!("dev2dev({dst:#x}, {src:#x}, {len}) failed")))
        }
    }

    fn run(&self, target_id: i32, fn_addr: u64, args_addr: u64) -> Result<(), PluginError> {
        let f = self.run.ok_or(PluginError::Unsupported("run"))?;
        if unsafe { f(target_id, fn_addr, args_addr) } == 0 {
            Ok(())
        } else {
            Err(PluginError::Transfer(format!("run({fn_addr:#x}) failed on device {target_id}")))
        }
    }
}

/// Discovers and loads `GOMP_OFFLOAD_*` plugins by the
/// `libgomp-plugin-<name><suffix>` filename convention.
pub struct PluginLoader {
    search_path: Vec<PathBuf>,
}

impl PluginLoader {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    fn plugin_filename(target_name: &str) -> String {
        format!("libgomp-plugin-{target_name}{}", std::env::consts::DLL_SUFFIX)
    }

    /// Try to load the plugin for `target_name` (e.g. `"nvptx"`, `"gcn"`)
    /// from the configured search path, in order.
    pub fn load(&self, target_name: &str) -> Result<Arc<dyn DevicePlugin>, PluginError> {
        let filename = Self::plugin_filename(target_name);
        let mut last_err = PluginError::Load(format!("no search path entry produced {filename}"));
        for dir in &self.search_path {
            let candidate = dir.join(&filename);
            if !candidate.exists() {
                continue;
            }
            match unsafe { DlopenPlugin::load(&candidate) } {
                Ok(plugin) => {
                    tracing::info!(target = target_name, path = %candidate.display(), "loaded offload plugin");
                    return Ok(Arc::new(plugin));
                }
                Err(e) => {
                    tracing::warn!(target = target_name, path = %candidate.display(), error = %e, "plugin load failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
