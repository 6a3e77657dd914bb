// Physical device selection
//
// First device, first queue family (in enumeration order) that can both
// draw and present to the bound surface. No scoring.

use super::context::PresentationContext;
use super::error::{SetupError, VkResultExt};
use ash::prelude::VkResult;
use ash::vk;

/// Upper bound on enumerated devices and queue families
pub const MAX_ENUMERATED: usize = 64;

/// The one device we will build on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalDeviceCandidate {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,
}

/// Pick the device and queue family for the context's surface
pub fn select_device(context: &PresentationContext) -> Result<PhysicalDeviceCandidate, SetupError> {
    let instance = &context.instance;
    let surface = context.surface();

    let devices = unsafe { instance.enumerate_physical_devices() }
        .during("vkEnumeratePhysicalDevices")?;
    log::debug!("Found {} physical device(s)", devices.len());

    let (physical_device, queue_family_index) = first_qualifying(
        &devices,
        |device| unsafe { instance.get_physical_device_queue_family_properties(device) },
        |device, family| unsafe {
            context
                .surface_loader
                .get_physical_device_surface_support(device, family, surface)
        },
    )?
    .ok_or(SetupError::NoSuitableDevice)?;

    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    log::info!(
        "Selected GPU: {} (queue family {})",
        properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default(),
        queue_family_index
    );
    log::info!(
        "API Version: {}.{}.{}",
        vk::api_version_major(properties.api_version),
        vk::api_version_minor(properties.api_version),
        vk::api_version_patch(properties.api_version)
    );

    Ok(PhysicalDeviceCandidate {
        physical_device,
        queue_family_index,
    })
}

/// Walk devices then families in order and return the first graphics family
/// that `presents` accepts. Query failures propagate rather than skip.
pub(crate) fn first_qualifying<D, F, P>(
    devices: &[D],
    mut queue_families: F,
    mut presents: P,
) -> Result<Option<(D, u32)>, SetupError>
where
    D: Copy,
    F: FnMut(D) -> Vec<vk::QueueFamilyProperties>,
    P: FnMut(D, u32) -> VkResult<bool>,
{
    check_count("physical device", devices.len())?;

    for &device in devices {
        let families = queue_families(device);
        check_count("queue family", families.len())?;

        for (index, family) in families.iter().enumerate() {
            if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            let index = index as u32;
            if presents(device, index).during("vkGetPhysicalDeviceSurfaceSupportKHR")? {
                return Ok(Some((device, index)));
            }
        }
    }

    Ok(None)
}

fn check_count(what: &'static str, count: usize) -> Result<(), SetupError> {
    if count > MAX_ENUMERATED {
        return Err(SetupError::TooMany {
            what,
            count,
            limit: MAX_ENUMERATED,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    /// Device id -> its families; presentation decided by (device, family)
    fn topology() -> Vec<Vec<vk::QueueFamilyProperties>> {
        vec![
            // device 0: compute only
            vec![family(vk::QueueFlags::COMPUTE)],
            // device 1: graphics on family 1 but it cannot present, family 2 can
            vec![
                family(vk::QueueFlags::TRANSFER),
                family(vk::QueueFlags::GRAPHICS),
                family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            ],
            // device 2: would also qualify, but comes later
            vec![family(vk::QueueFlags::GRAPHICS)],
        ]
    }

    fn select(
        topology: &[Vec<vk::QueueFamilyProperties>],
    ) -> Result<Option<(usize, u32)>, SetupError> {
        let devices: Vec<usize> = (0..topology.len()).collect();
        first_qualifying(
            &devices,
            |d| topology[d].clone(),
            |d, f| Ok(!(d == 1 && f == 1)),
        )
    }

    #[test]
    fn first_graphics_and_present_family_wins() {
        assert_eq!(select(&topology()).unwrap(), Some((1, 2)));
    }

    #[test]
    fn selection_is_deterministic() {
        let topology = topology();
        let first = select(&topology).unwrap();
        for _ in 0..10 {
            assert_eq!(select(&topology).unwrap(), first);
        }
    }

    #[test]
    fn no_qualifying_pair_is_not_found() {
        let devices = [0usize, 1];
        let found = first_qualifying(
            &devices,
            |_| vec![family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::COMPUTE)],
            |_, _| Ok(false),
        )
        .unwrap();
        assert_eq!(found, None);

        let none: [usize; 0] = [];
        assert_eq!(first_qualifying(&none, |_| vec![], |_, _| Ok(true)).unwrap(), None);
    }

    #[test]
    fn presentation_is_only_queried_for_graphics_families() {
        let devices = [7usize];
        let mut asked = Vec::new();
        first_qualifying(
            &devices,
            |_| vec![family(vk::QueueFlags::TRANSFER), family(vk::QueueFlags::GRAPHICS)],
            |_, f| {
                asked.push(f);
                Ok(true)
            },
        )
        .unwrap();
        assert_eq!(asked, vec![1]);
    }

    #[test]
    fn support_query_failure_propagates() {
        let devices = [0usize];
        let err = first_qualifying(
            &devices,
            |_| vec![family(vk::QueueFlags::GRAPHICS)],
            |_, _| Err(vk::Result::ERROR_SURFACE_LOST_KHR),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SetupError::Vulkan {
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
                ..
            }
        ));
    }

    #[test]
    fn oversized_enumeration_is_reported() {
        let devices = [0usize];
        let err = first_qualifying(
            &devices,
            |_| vec![family(vk::QueueFlags::TRANSFER); MAX_ENUMERATED + 1],
            |_, _| Ok(true),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SetupError::TooMany {
                what: "queue family",
                ..
            }
        ));

        let many: Vec<usize> = (0..=MAX_ENUMERATED).collect();
        assert!(matches!(
            first_qualifying(&many, |_| vec![], |_, _| Ok(true)),
            Err(SetupError::TooMany { what: "physical device", .. })
        ));
    }
}
