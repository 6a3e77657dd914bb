// Shader module loading
//
// Vulkan consumes SPIR-V as 32-bit words. Bytes handed in by the asset
// layer are checked and re-packed here, so alignment of the source buffer
// does not matter.

use super::error::{SetupError, VkResultExt};
use ash::vk;
use std::io::Cursor;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode a SPIR-V byte stream into words, rejecting truncated or foreign data
pub fn spirv_words(name: &str, code: &[u8]) -> Result<Vec<u32>, SetupError> {
    let invalid = |reason: &str| SetupError::InvalidShader {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };

    if code.is_empty() {
        return Err(invalid("empty byte stream"));
    }
    if code.len() % 4 != 0 {
        return Err(invalid("length is not a multiple of 4"));
    }

    // read_spv also fixes up byte order if the module was written big-endian.
    let words = ash::util::read_spv(&mut Cursor::new(code)).map_err(|e| invalid(&e.to_string()))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(invalid("missing SPIR-V magic number"));
    }
    Ok(words)
}

/// Create a shader module from raw SPIR-V bytes
pub fn create_shader_module(
    device: &ash::Device,
    name: &str,
    code: &[u8],
) -> Result<vk::ShaderModule, SetupError> {
    let words = spirv_words(name, code)?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

    unsafe { device.create_shader_module(&create_info, None) }.during("vkCreateShaderModule")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn accepts_well_formed_module() {
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = spirv_words("triangle.vert.spv", &bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn accepts_unaligned_source_buffer() {
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        assert!(spirv_words("shifted", &shifted[1..]).is_ok());
    }

    #[test]
    fn rejects_truncated_and_foreign_data() {
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000]);
        assert!(matches!(
            spirv_words("cut", &bytes[..7]),
            Err(SetupError::InvalidShader { .. })
        ));
        assert!(matches!(
            spirv_words("empty", &[]),
            Err(SetupError::InvalidShader { .. })
        ));
        let text = b"#version 450\nvoid main(){}\n\0\0\0";
        let err = spirv_words("glsl", &text[..28]).unwrap_err();
        assert!(err.to_string().contains("glsl"), "{err}");
    }
}
