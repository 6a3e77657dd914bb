// Validation message routing
//
// The debug messenger gets a pointer to a boxed `MessageSink` as its user
// data, so messages land in whatever sink the renderer was built with
// instead of a global log target.

use super::error::{SetupError, VkResultExt};
use ash::vk;
use std::ffi::{c_void, CStr};
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageSeverity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl MessageSeverity {
    fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            MessageSeverity::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            MessageSeverity::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            MessageSeverity::Info
        } else {
            MessageSeverity::Verbose
        }
    }
}

/// Receives validation layer complaints. Must only observe.
pub trait MessageSink: Send + Sync {
    fn on_message(&self, severity: MessageSeverity, message: &str);
}

/// Forwards validation messages to the `log` facade
#[derive(Debug, Default)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn on_message(&self, severity: MessageSeverity, message: &str) {
        match severity {
            MessageSeverity::Error => log::error!(target: "vulkan", "{}", message),
            MessageSeverity::Warning => log::warn!(target: "vulkan", "{}", message),
            MessageSeverity::Info => log::info!(target: "vulkan", "{}", message),
            MessageSeverity::Verbose => log::debug!(target: "vulkan", "{}", message),
        }
    }
}

/// Registered debug messenger plus the sink it reports to
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    // Double box: the messenger holds a thin pointer to the inner fat one.
    _sink: Box<Box<dyn MessageSink>>,
}

impl DebugMessenger {
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        sink: Box<dyn MessageSink>,
    ) -> Result<Self, SetupError> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let sink = Box::new(sink);
        let user_data = &*sink as *const Box<dyn MessageSink> as *mut c_void;

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(user_data);

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .during("vkCreateDebugUtilsMessengerEXT")?;

        Ok(Self {
            loader,
            messenger,
            _sink: sink,
        })
    }

    /// Must run before the instance is destroyed
    pub unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

fn dispatch(
    sink: &dyn MessageSink,
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message: &str,
) {
    let severity = MessageSeverity::from_vk(severity);
    // A panicking sink must not unwind into the driver.
    let _ = panic::catch_unwind(AssertUnwindSafe(|| sink.on_message(severity, message)));
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_user_data.is_null() || p_callback_data.is_null() {
        return vk::FALSE;
    }

    let sink = &*(p_user_data as *const Box<dyn MessageSink>);
    let p_message = (*p_callback_data).p_message;
    let message = if p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        CStr::from_ptr(p_message).to_string_lossy()
    };

    dispatch(&**sink, message_severity, &message);

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(MessageSeverity, String)>>);

    impl MessageSink for Recorder {
        fn on_message(&self, severity: MessageSeverity, message: &str) {
            self.0.lock().unwrap().push((severity, message.to_owned()));
        }
    }

    struct Panicky;

    impl MessageSink for Panicky {
        fn on_message(&self, _: MessageSeverity, _: &str) {
            panic!("sink exploded");
        }
    }

    #[test]
    fn severity_prefers_the_most_severe_bit() {
        let both = vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
        assert_eq!(MessageSeverity::from_vk(both), MessageSeverity::Error);
        assert_eq!(
            MessageSeverity::from_vk(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING),
            MessageSeverity::Warning
        );
        assert_eq!(
            MessageSeverity::from_vk(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            MessageSeverity::Verbose
        );
    }

    #[test]
    fn dispatch_reaches_the_registered_sink() {
        let recorder = Recorder::default();
        dispatch(
            &recorder,
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            "vkCmdDraw: no pipeline bound",
        );
        let seen = recorder.0.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[(MessageSeverity::Error, "vkCmdDraw: no pipeline bound".to_owned())]
        );
    }

    #[test]
    fn callback_swallows_sink_panics() {
        let sink: Box<dyn MessageSink> = Box::new(Panicky);
        let message = c"boom";
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: message.as_ptr(),
            ..Default::default()
        };
        let user_data = &sink as *const Box<dyn MessageSink> as *mut c_void;

        let ret = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                user_data,
            )
        };
        assert_eq!(ret, vk::FALSE);
    }
}
