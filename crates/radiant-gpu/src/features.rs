//! Feature-struct reflection.
//!
//! Every Vulkan feature struct shares one layout: an `sType` tag, a `pNext`
//! pointer, then tightly packed `VkBool32` fields. The catalog below records,
//! per supported struct, its size, its bool fields in declaration order and
//! what provides it (a core version or one or more extensions). The selector
//! uses this to OR-merge requirement chains, query driver support field by
//! field and assemble the enabled chain passed to `vkCreateDevice`.

use std::ffi::CStr;
use std::os::raw::c_void;

use ash::vk;

use crate::error::fatal;

/// A type-erased chain node.
pub(crate) type ChainNode = vk::BaseOutStructure<'static>;

/// Offset of the first bool field in any feature struct.
const HEADER: usize = std::mem::size_of::<ChainNode>();

/// What provides a feature struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureDependency {
    /// Core as of Vulkan 1.x.
    Core(u32),
    /// Provided by an extension.
    Extension(&'static CStr),
}

/// Catalog descriptor for one feature struct.
#[derive(Debug)]
pub struct FeatureType {
    pub stype: vk::StructureType,
    pub name: &'static str,
    /// Byte size including trailing padding.
    pub size: usize,
    /// Bool fields in declaration order; field `i` lives at `HEADER + 4 * i`.
    pub fields: &'static [&'static str],
    pub dependencies: &'static [FeatureDependency],
}

impl FeatureType {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|&f| f == name)
    }

    /// # Safety
    /// `node` must point to a live struct of this type.
    pub(crate) unsafe fn read_bool(&self, node: *const ChainNode, field: usize) -> vk::Bool32 {
        debug_assert!(field < self.fields.len());
        (node.cast::<u8>().add(HEADER + 4 * field) as *const vk::Bool32).read_unaligned()
    }

    /// # Safety
    /// `node` must point to a live, mutable struct of this type.
    pub(crate) unsafe fn write_bool(&self, node: *mut ChainNode, field: usize, value: vk::Bool32) {
        debug_assert!(field < self.fields.len());
        (node.cast::<u8>().add(HEADER + 4 * field) as *mut vk::Bool32).write_unaligned(value);
    }
}

macro_rules! feature_catalog {
    ($($stype:ident => $ty:ty, $name:literal, deps: [$($dep:expr),* $(,)?], fields: [$($field:literal),+ $(,)?];)+) => {
        static CATALOG: &[FeatureType] = &[$(
            FeatureType {
                stype: vk::StructureType::$stype,
                name: $name,
                size: std::mem::size_of::<$ty>(),
                fields: &[$($field),+],
                dependencies: &[$($dep),*],
            },
        )+];
    };
}

use FeatureDependency::{Core, Extension};

feature_catalog! {
    PHYSICAL_DEVICE_FEATURES_2 => vk::PhysicalDeviceFeatures2<'static>, "PhysicalDeviceFeatures2",
    deps: [],
    fields: [
        "robust_buffer_access", "full_draw_index_uint32", "image_cube_array",
        "independent_blend", "geometry_shader", "tessellation_shader",
        "sample_rate_shading", "dual_src_blend", "logic_op",
        "multi_draw_indirect", "draw_indirect_first_instance", "depth_clamp",
        "depth_bias_clamp", "fill_mode_non_solid", "depth_bounds",
        "wide_lines", "large_points", "alpha_to_one", "multi_viewport",
        "sampler_anisotropy", "texture_compression_etc2",
        "texture_compression_astc_ldr", "texture_compression_bc",
        "occlusion_query_precise", "pipeline_statistics_query",
        "vertex_pipeline_stores_and_atomics", "fragment_stores_and_atomics",
        "shader_tessellation_and_geometry_point_size",
        "shader_image_gather_extended", "shader_storage_image_extended_formats",
        "shader_storage_image_multisample",
        "shader_storage_image_read_without_format",
        "shader_storage_image_write_without_format",
        "shader_uniform_buffer_array_dynamic_indexing",
        "shader_sampled_image_array_dynamic_indexing",
        "shader_storage_buffer_array_dynamic_indexing",
        "shader_storage_image_array_dynamic_indexing", "shader_clip_distance",
        "shader_cull_distance", "shader_float64", "shader_int64",
        "shader_int16", "shader_resource_residency", "shader_resource_min_lod",
        "sparse_binding", "sparse_residency_buffer",
        "sparse_residency_image2_d", "sparse_residency_image3_d",
        "sparse_residency2_samples", "sparse_residency4_samples",
        "sparse_residency8_samples", "sparse_residency16_samples",
        "sparse_residency_aliased", "variable_multisample_rate",
        "inherited_queries",
    ];
    PHYSICAL_DEVICE_VULKAN_1_1_FEATURES => vk::PhysicalDeviceVulkan11Features<'static>, "PhysicalDeviceVulkan11Features",
    deps: [Core(2)],
    fields: [
        "storage_buffer16_bit_access", "uniform_and_storage_buffer16_bit_access",
        "storage_push_constant16", "storage_input_output16", "multiview",
        "multiview_geometry_shader", "multiview_tessellation_shader",
        "variable_pointers_storage_buffer", "variable_pointers",
        "protected_memory", "sampler_ycbcr_conversion", "shader_draw_parameters",
    ];
    PHYSICAL_DEVICE_VULKAN_1_2_FEATURES => vk::PhysicalDeviceVulkan12Features<'static>, "PhysicalDeviceVulkan12Features",
    deps: [Core(2)],
    fields: [
        "sampler_mirror_clamp_to_edge", "draw_indirect_count",
        "storage_buffer8_bit_access", "uniform_and_storage_buffer8_bit_access",
        "storage_push_constant8", "shader_buffer_int64_atomics",
        "shader_shared_int64_atomics", "shader_float16", "shader_int8",
        "descriptor_indexing", "shader_input_attachment_array_dynamic_indexing",
        "shader_uniform_texel_buffer_array_dynamic_indexing",
        "shader_storage_texel_buffer_array_dynamic_indexing",
        "shader_uniform_buffer_array_non_uniform_indexing",
        "shader_sampled_image_array_non_uniform_indexing",
        "shader_storage_buffer_array_non_uniform_indexing",
        "shader_storage_image_array_non_uniform_indexing",
        "shader_input_attachment_array_non_uniform_indexing",
        "shader_uniform_texel_buffer_array_non_uniform_indexing",
        "shader_storage_texel_buffer_array_non_uniform_indexing",
        "descriptor_binding_uniform_buffer_update_after_bind",
        "descriptor_binding_sampled_image_update_after_bind",
        "descriptor_binding_storage_image_update_after_bind",
        "descriptor_binding_storage_buffer_update_after_bind",
        "descriptor_binding_uniform_texel_buffer_update_after_bind",
        "descriptor_binding_storage_texel_buffer_update_after_bind",
        "descriptor_binding_update_unused_while_pending",
        "descriptor_binding_partially_bound",
        "descriptor_binding_variable_descriptor_count",
        "runtime_descriptor_array", "sampler_filter_minmax",
        "scalar_block_layout", "imageless_framebuffer",
        "uniform_buffer_standard_layout", "shader_subgroup_extended_types",
        "separate_depth_stencil_layouts", "host_query_reset",
        "timeline_semaphore", "buffer_device_address",
        "buffer_device_address_capture_replay",
        "buffer_device_address_multi_device", "vulkan_memory_model",
        "vulkan_memory_model_device_scope",
        "vulkan_memory_model_availability_visibility_chains",
        "shader_output_viewport_index", "shader_output_layer",
        "subgroup_broadcast_dynamic_id",
    ];
    PHYSICAL_DEVICE_VULKAN_1_3_FEATURES => vk::PhysicalDeviceVulkan13Features<'static>, "PhysicalDeviceVulkan13Features",
    deps: [Core(3)],
    fields: [
        "robust_image_access", "inline_uniform_block",
        "descriptor_binding_inline_uniform_block_update_after_bind",
        "pipeline_creation_cache_control", "private_data",
        "shader_demote_to_helper_invocation", "shader_terminate_invocation",
        "subgroup_size_control", "compute_full_subgroups", "synchronization2",
        "texture_compression_astc_hdr",
        "shader_zero_initialize_workgroup_memory", "dynamic_rendering",
        "shader_integer_dot_product", "maintenance4",
    ];
    PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES => vk::PhysicalDeviceTimelineSemaphoreFeatures<'static>, "PhysicalDeviceTimelineSemaphoreFeatures",
    deps: [Core(2)],
    fields: ["timeline_semaphore"];
    PHYSICAL_DEVICE_SYNCHRONIZATION_2_FEATURES => vk::PhysicalDeviceSynchronization2Features<'static>, "PhysicalDeviceSynchronization2Features",
    deps: [Core(3)],
    fields: ["synchronization2"];
    PHYSICAL_DEVICE_DYNAMIC_RENDERING_FEATURES => vk::PhysicalDeviceDynamicRenderingFeatures<'static>, "PhysicalDeviceDynamicRenderingFeatures",
    deps: [Core(3)],
    fields: ["dynamic_rendering"];
    PHYSICAL_DEVICE_MAINTENANCE_4_FEATURES => vk::PhysicalDeviceMaintenance4Features<'static>, "PhysicalDeviceMaintenance4Features",
    deps: [Core(3)],
    fields: ["maintenance4"];
    PHYSICAL_DEVICE_BUFFER_DEVICE_ADDRESS_FEATURES => vk::PhysicalDeviceBufferDeviceAddressFeatures<'static>, "PhysicalDeviceBufferDeviceAddressFeatures",
    deps: [Core(2)],
    fields: [
        "buffer_device_address", "buffer_device_address_capture_replay",
        "buffer_device_address_multi_device",
    ];
    PHYSICAL_DEVICE_DESCRIPTOR_INDEXING_FEATURES => vk::PhysicalDeviceDescriptorIndexingFeatures<'static>, "PhysicalDeviceDescriptorIndexingFeatures",
    deps: [Core(2)],
    fields: [
        "shader_input_attachment_array_dynamic_indexing",
        "shader_uniform_texel_buffer_array_dynamic_indexing",
        "shader_storage_texel_buffer_array_dynamic_indexing",
        "shader_uniform_buffer_array_non_uniform_indexing",
        "shader_sampled_image_array_non_uniform_indexing",
        "shader_storage_buffer_array_non_uniform_indexing",
        "shader_storage_image_array_non_uniform_indexing",
        "shader_input_attachment_array_non_uniform_indexing",
        "shader_uniform_texel_buffer_array_non_uniform_indexing",
        "shader_storage_texel_buffer_array_non_uniform_indexing",
        "descriptor_binding_uniform_buffer_update_after_bind",
        "descriptor_binding_sampled_image_update_after_bind",
        "descriptor_binding_storage_image_update_after_bind",
        "descriptor_binding_storage_buffer_update_after_bind",
        "descriptor_binding_uniform_texel_buffer_update_after_bind",
        "descriptor_binding_storage_texel_buffer_update_after_bind",
        "descriptor_binding_update_unused_while_pending",
        "descriptor_binding_partially_bound",
        "descriptor_binding_variable_descriptor_count",
        "runtime_descriptor_array",
    ];
    PHYSICAL_DEVICE_SWAPCHAIN_MAINTENANCE_1_FEATURES_EXT => vk::PhysicalDeviceSwapchainMaintenance1FeaturesEXT<'static>, "PhysicalDeviceSwapchainMaintenance1FeaturesEXT",
    deps: [
        Extension(ash::ext::swapchain_maintenance1::NAME),
        Extension(c"VK_KHR_swapchain_maintenance1"),
    ],
    fields: ["swapchain_maintenance1"];
    PHYSICAL_DEVICE_MESH_SHADER_FEATURES_EXT => vk::PhysicalDeviceMeshShaderFeaturesEXT<'static>, "PhysicalDeviceMeshShaderFeaturesEXT",
    deps: [Extension(ash::ext::mesh_shader::NAME)],
    fields: [
        "task_shader", "mesh_shader", "multiview_mesh_shader",
        "primitive_fragment_shading_rate_mesh_shader", "mesh_shader_queries",
    ];
    PHYSICAL_DEVICE_ROBUSTNESS_2_FEATURES_EXT => vk::PhysicalDeviceRobustness2FeaturesEXT<'static>, "PhysicalDeviceRobustness2FeaturesEXT",
    deps: [Extension(ash::ext::robustness2::NAME)],
    fields: ["robust_buffer_access2", "robust_image_access2", "null_descriptor"];
}

/// Look up a descriptor by tag.
pub fn type_of(stype: vk::StructureType) -> Option<&'static FeatureType> {
    CATALOG.iter().find(|t| t.stype == stype)
}

/// Byte size of a supported struct, 0 when the tag is unknown.
pub fn size_of(stype: vk::StructureType) -> usize {
    type_of(stype).map_or(0, |t| t.size)
}

/// Catalog lookup that aborts on unknown tags; selector paths may only see
/// tags the catalog knows, anything else is caller error.
pub(crate) fn expect_type(stype: vk::StructureType) -> &'static FeatureType {
    match type_of(stype) {
        Some(t) => t,
        None => fatal(&format!("Unknown feature struct sType: {stype:?}")),
    }
}

/// One owned, zero-filled feature struct.
///
/// Backing storage is `u64`-aligned so the embedded `pNext` pointer is valid,
/// and boxed so its address survives moves of the surrounding collection.
pub(crate) struct FeatureBlock {
    ty: &'static FeatureType,
    data: Box<[u64]>,
}

impl FeatureBlock {
    pub(crate) fn allocate(ty: &'static FeatureType) -> Self {
        let mut block = Self {
            ty,
            data: vec![0u64; ty.size.div_ceil(8)].into_boxed_slice(),
        };
        unsafe { (*block.as_mut_ptr()).s_type = ty.stype };
        block
    }

    /// Bitwise copy with the `pNext` link severed.
    pub(crate) fn clone_unlinked(&self) -> Self {
        let mut block = Self {
            ty: self.ty,
            data: self.data.clone(),
        };
        unsafe { (*block.as_mut_ptr()).p_next = std::ptr::null_mut() };
        block
    }

    pub(crate) fn ty(&self) -> &'static FeatureType {
        self.ty
    }

    pub(crate) fn as_ptr(&self) -> *const ChainNode {
        self.data.as_ptr().cast()
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut ChainNode {
        self.data.as_mut_ptr().cast()
    }

    pub(crate) fn bool_field(&self, field: usize) -> vk::Bool32 {
        unsafe { self.ty.read_bool(self.as_ptr(), field) }
    }

    pub(crate) fn set_bool_field(&mut self, field: usize, value: vk::Bool32) {
        unsafe { self.ty.write_bool(self.as_mut_ptr(), field, value) };
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast(), self.ty.size) }
    }
}

/// An owned feature chain headed by `VkPhysicalDeviceFeatures2`.
///
/// The selector keeps three of these (required, optional, enabled) plus a
/// scratch one for driver queries. Blocks are linked through `pNext` as they
/// are appended; the head's own bool fields are the embedded
/// `VkPhysicalDeviceFeatures`.
pub(crate) struct FeatureChain {
    head: vk::PhysicalDeviceFeatures2<'static>,
    blocks: Vec<FeatureBlock>,
}

impl FeatureChain {
    pub(crate) fn new() -> Self {
        Self {
            head: vk::PhysicalDeviceFeatures2::default(),
            blocks: Vec::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.head = vk::PhysicalDeviceFeatures2::default();
        self.blocks.clear();
    }

    /// Number of nodes including the head.
    pub(crate) fn len(&self) -> usize {
        self.blocks.len() + 1
    }

    /// Tag of node `i` (0 is the head).
    pub(crate) fn tag(&self, i: usize) -> vk::StructureType {
        if i == 0 {
            vk::StructureType::PHYSICAL_DEVICE_FEATURES_2
        } else {
            self.blocks[i - 1].ty().stype
        }
    }

    /// Descriptor and address of node `i` (0 is the head).
    pub(crate) fn node(&self, i: usize) -> (&'static FeatureType, *const ChainNode) {
        if i == 0 {
            let ty = expect_type(vk::StructureType::PHYSICAL_DEVICE_FEATURES_2);
            (ty, std::ptr::from_ref(&self.head).cast())
        } else {
            let block = &self.blocks[i - 1];
            (block.ty(), block.as_ptr())
        }
    }

    /// Head to hand to `vkGetPhysicalDeviceFeatures2`.
    pub(crate) fn head_mut(&mut self) -> &mut vk::PhysicalDeviceFeatures2<'static> {
        &mut self.head
    }

    /// Pointer to the full chain, for `VkDeviceCreateInfo::pNext`.
    pub(crate) fn chain_ptr(&self) -> *const c_void {
        std::ptr::from_ref(&self.head).cast()
    }

    fn link_new_block(&mut self, mut block: FeatureBlock) {
        let ptr = block.as_mut_ptr();
        match self.blocks.last_mut() {
            Some(last) => unsafe { (*last.as_mut_ptr()).p_next = ptr },
            None => self.head.p_next = ptr.cast(),
        }
        self.blocks.push(block);
    }

    fn block_index(&self, stype: vk::StructureType) -> Option<usize> {
        self.blocks.iter().position(|b| b.ty().stype == stype)
    }

    /// Appends an empty struct for `stype` unless already present. The head
    /// tag is always present and is skipped.
    pub(crate) fn append(&mut self, stype: vk::StructureType) {
        if stype == vk::StructureType::PHYSICAL_DEVICE_FEATURES_2 {
            return;
        }
        if self.block_index(stype).is_none() {
            self.link_new_block(FeatureBlock::allocate(expect_type(stype)));
        }
    }

    /// OR-merges the bool fields of one caller node into this chain,
    /// appending a struct for its tag if needed.
    ///
    /// # Safety
    /// `node` must point to a live struct whose tag the catalog knows.
    pub(crate) unsafe fn merge_node(&mut self, node: *const ChainNode) {
        let stype = (*node).s_type;
        let ty = expect_type(stype);
        if stype == vk::StructureType::PHYSICAL_DEVICE_FEATURES_2 {
            let head = std::ptr::from_mut(&mut self.head).cast::<ChainNode>();
            for i in 0..ty.fields.len() {
                let merged = ty.read_bool(head.cast_const(), i) | ty.read_bool(node, i);
                ty.write_bool(head, i, merged);
            }
            return;
        }
        self.append(stype);
        let index = self.block_index(stype).expect("just appended");
        let block = &mut self.blocks[index];
        for i in 0..ty.fields.len() {
            let merged = block.bool_field(i) | ty.read_bool(node, i);
            block.set_bool_field(i, merged);
        }
    }

    /// Sets the given fields of `stype` to TRUE, appending the struct first
    /// if needed.
    pub(crate) fn set_fields(&mut self, stype: vk::StructureType, fields: &[usize]) {
        if stype == vk::StructureType::PHYSICAL_DEVICE_FEATURES_2 {
            let ty = expect_type(stype);
            let head = std::ptr::from_mut(&mut self.head).cast::<ChainNode>();
            for &i in fields {
                unsafe { ty.write_bool(head, i, vk::TRUE) };
            }
            return;
        }
        self.append(stype);
        let index = self.block_index(stype).expect("just appended");
        let block = &mut self.blocks[index];
        for &i in fields {
            block.set_bool_field(i, vk::TRUE);
        }
    }

    /// Overwrites the bool fields of one caller node from this chain. Tags
    /// this chain does not hold read back as all-FALSE.
    ///
    /// # Safety
    /// `node` must point to a live, mutable struct whose tag the catalog
    /// knows.
    pub(crate) unsafe fn extract_node(&self, node: *mut ChainNode) {
        let stype = (*node).s_type;
        let ty = expect_type(stype);
        if stype == vk::StructureType::PHYSICAL_DEVICE_FEATURES_2 {
            let head = std::ptr::from_ref(&self.head).cast::<ChainNode>();
            for i in 0..ty.fields.len() {
                ty.write_bool(node, i, ty.read_bool(head, i));
            }
            return;
        }
        match self.block_index(stype) {
            Some(idx) => {
                let block = &self.blocks[idx];
                for i in 0..ty.fields.len() {
                    ty.write_bool(node, i, block.bool_field(i));
                }
            }
            None => {
                for i in 0..ty.fields.len() {
                    ty.write_bool(node, i, vk::FALSE);
                }
            }
        }
    }
}

/// Walks a caller-built features chain, visiting the head and every `pNext`
/// node.
///
/// # Safety
/// Every node reachable through `pNext` must be live for the duration of the
/// walk.
pub(crate) unsafe fn walk_chain(
    features: &vk::PhysicalDeviceFeatures2,
    mut visit: impl FnMut(*const ChainNode),
) {
    let mut node = std::ptr::from_ref(features).cast::<ChainNode>();
    while !node.is_null() {
        visit(node);
        node = (*node).p_next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_sizes_cover_declared_fields() {
        for ty in CATALOG {
            let fields_end = HEADER + 4 * ty.fields.len();
            assert!(
                ty.size >= fields_end && ty.size < fields_end + 8,
                "{}: size {} does not match {} bool fields",
                ty.name,
                ty.size,
                ty.fields.len()
            );
        }
    }

    #[test]
    fn allocate_is_zeroed_and_tagged() {
        let ty = expect_type(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES);
        let block = FeatureBlock::allocate(ty);
        unsafe {
            assert_eq!((*block.as_ptr()).s_type, ty.stype);
            assert!((*block.as_ptr()).p_next.is_null());
        }
        for i in 0..ty.fields.len() {
            assert_eq!(block.bool_field(i), vk::FALSE);
        }
    }

    #[test]
    fn clone_round_trips_bytes() {
        let ty = expect_type(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES);
        let fresh = FeatureBlock::allocate(ty);
        let clone = fresh.clone_unlinked();
        assert_eq!(fresh.bytes(), clone.bytes());
    }

    #[test]
    fn field_offsets_match_ash_layout() {
        let ty = expect_type(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES);
        let features = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(true);
        let node = std::ptr::from_ref(&features).cast::<ChainNode>();
        let timeline = ty.field_index("timeline_semaphore").unwrap();
        let bda = ty.field_index("buffer_device_address").unwrap();
        let host_query = ty.field_index("host_query_reset").unwrap();
        unsafe {
            assert_eq!(ty.read_bool(node, timeline), vk::TRUE);
            assert_eq!(ty.read_bool(node, bda), vk::TRUE);
            assert_eq!(ty.read_bool(node, host_query), vk::FALSE);
        }
    }

    #[test]
    fn merge_is_an_or_over_repeated_calls() {
        let ty = expect_type(vk::StructureType::PHYSICAL_DEVICE_FEATURES_2);
        let sample = ty.field_index("sample_rate_shading").unwrap();
        let robust = ty.field_index("robust_buffer_access").unwrap();

        let mut chain = FeatureChain::new();
        let a = vk::PhysicalDeviceFeatures2::default()
            .features(vk::PhysicalDeviceFeatures::default().sample_rate_shading(true));
        let b = vk::PhysicalDeviceFeatures2::default()
            .features(vk::PhysicalDeviceFeatures::default().robust_buffer_access(true));
        unsafe {
            chain.merge_node(std::ptr::from_ref(&a).cast());
            chain.merge_node(std::ptr::from_ref(&b).cast());
        }

        let mut combined = FeatureChain::new();
        let both = vk::PhysicalDeviceFeatures2::default().features(
            vk::PhysicalDeviceFeatures::default()
                .sample_rate_shading(true)
                .robust_buffer_access(true),
        );
        unsafe { combined.merge_node(std::ptr::from_ref(&both).cast()) };

        for chain in [&chain, &combined] {
            let (ty, node) = chain.node(0);
            unsafe {
                assert_eq!(ty.read_bool(node, sample), vk::TRUE);
                assert_eq!(ty.read_bool(node, robust), vk::TRUE);
            }
        }
    }

    #[test]
    fn append_deduplicates_tags() {
        let mut chain = FeatureChain::new();
        chain.append(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES);
        chain.append(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES);
        chain.append(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES);
        assert_eq!(chain.len(), 3);
        assert_eq!(
            chain.tag(1),
            vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES
        );
    }

    #[test]
    fn blocks_stay_linked() {
        let mut chain = FeatureChain::new();
        chain.append(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES);
        chain.append(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES);
        unsafe {
            let first = chain.head.p_next.cast::<ChainNode>();
            assert_eq!(
                (*first).s_type,
                vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES
            );
            let second = (*first).p_next;
            assert_eq!(
                (*second).s_type,
                vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES
            );
            assert!((*second).p_next.is_null());
        }
    }

    #[test]
    fn extract_zeroes_absent_tags() {
        let chain = FeatureChain::new();
        let mut caller = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true)
            .maintenance4(true);
        unsafe { chain.extract_node(std::ptr::from_mut(&mut caller).cast()) };
        assert_eq!(caller.synchronization2, vk::FALSE);
        assert_eq!(caller.maintenance4, vk::FALSE);
    }

    #[test]
    fn extract_reads_back_set_fields() {
        let ty = expect_type(vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES);
        let sync2 = ty.field_index("synchronization2").unwrap();

        let mut chain = FeatureChain::new();
        chain.set_fields(
            vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
            &[sync2],
        );

        let mut caller = vk::PhysicalDeviceVulkan13Features::default().maintenance4(true);
        unsafe { chain.extract_node(std::ptr::from_mut(&mut caller).cast()) };
        assert_eq!(caller.synchronization2, vk::TRUE);
        assert_eq!(caller.maintenance4, vk::FALSE);
    }
}
