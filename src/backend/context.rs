// Presentation context - instance, validation channel and window surface
//
// Owns the three objects everything else hangs off. Dropped last.

use super::debug::{DebugMessenger, MessageSink};
use super::error::{ExtensionKind, SetupError, VkResultExt};
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, CStr, CString};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct PresentationContext {
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    surface: Option<vk::SurfaceKHR>,
    debug_messenger: Option<DebugMessenger>,
    entry: Entry,
}

impl PresentationContext {
    /// Load Vulkan and create the instance
    ///
    /// `required_extensions` are the names the windowing layer needs for
    /// surface creation. With `enable_validation` the Khronos layer and
    /// `VK_EXT_debug_utils` are added and messages are routed to `sink`.
    pub fn initialize(
        app_name: &str,
        required_extensions: &[&CStr],
        enable_validation: bool,
        sink: Box<dyn MessageSink>,
    ) -> Result<Self, SetupError> {
        let entry = unsafe { Entry::load() }?;

        let enable_validation = enable_validation && Self::validation_layer_present(&entry)?;
        let extensions = instance_extensions(required_extensions, enable_validation);

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .during("vkEnumerateInstanceExtensionProperties")?;
        let available: Vec<&CStr> = available
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .collect();
        if let Some(missing) = first_missing(&extensions, &available) {
            return Err(SetupError::MissingExtension {
                kind: ExtensionKind::Instance,
                name: missing.to_string_lossy().into_owned(),
            });
        }

        let app_name = CString::new(app_name).unwrap_or_else(|_| c"vk-triangle".to_owned());
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.during("vkCreateInstance")?;
        log::info!(
            "Vulkan instance created ({} extensions, validation {})",
            extension_ptrs.len(),
            if enable_validation { "on" } else { "off" }
        );

        let debug_messenger = if enable_validation {
            match DebugMessenger::new(&entry, &instance, sink) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        Ok(Self {
            instance,
            surface_loader,
            surface: None,
            debug_messenger,
            entry,
        })
    }

    fn validation_layer_present(entry: &Entry) -> Result<bool, SetupError> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .during("vkEnumerateInstanceLayerProperties")?;
        let present = layers
            .iter()
            .any(|l| l.layer_name_as_c_str().map_or(false, |name| name == VALIDATION_LAYER));
        if !present {
            log::warn!(
                "{} is not installed, continuing without validation",
                VALIDATION_LAYER.to_string_lossy()
            );
        }
        Ok(present)
    }

    /// Bind this context to a window. A second call fails with
    /// `SurfaceAlreadyCreated`.
    pub fn create_surface<W>(&mut self, window: &W) -> Result<vk::SurfaceKHR, SetupError>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        ensure_unbound(self.surface)?;

        let display = window.display_handle()?.as_raw();
        let handle = window.window_handle()?.as_raw();

        let surface = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, display, handle, None)
        }
        .during("vkCreateSurfaceKHR")?;

        log::info!("Window surface created");
        self.surface = Some(surface);
        Ok(surface)
    }

    /// The bound surface, or a null handle before `create_surface`
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.unwrap_or_default()
    }
}

impl Drop for PresentationContext {
    fn drop(&mut self) {
        log::info!("Destroying presentation context...");

        unsafe {
            if let Some(surface) = self.surface.take() {
                self.surface_loader.destroy_surface(surface, None);
            }
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Platform extensions plus debug utils when validating, without duplicates
fn instance_extensions<'a>(required: &[&'a CStr], enable_validation: bool) -> Vec<&'a CStr> {
    let mut extensions: Vec<&CStr> = Vec::with_capacity(required.len() + 1);
    for &name in required {
        if !extensions.contains(&name) {
            extensions.push(name);
        }
    }
    if enable_validation && !extensions.contains(&ash::ext::debug_utils::NAME) {
        extensions.push(ash::ext::debug_utils::NAME);
    }
    extensions
}

/// A context is bound to exactly one window for its whole life
fn ensure_unbound(surface: Option<vk::SurfaceKHR>) -> Result<(), SetupError> {
    match surface {
        Some(_) => Err(SetupError::SurfaceAlreadyCreated),
        None => Ok(()),
    }
}

pub(crate) fn first_missing<'a>(wanted: &[&'a CStr], available: &[&CStr]) -> Option<&'a CStr> {
    wanted.iter().copied().find(|w| !available.contains(w))
}
