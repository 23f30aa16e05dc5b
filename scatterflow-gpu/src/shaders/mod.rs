/*!
# WGSL Shader Collection

Every module is assembled as `COMMON` followed by one stage file, so all
pipelines agree on the group 0 view uniforms and the group 1 point arrays.
*/

/// View uniforms, point arrays, coordinate helpers and the per-point hash
pub const COMMON: &str = include_str!("common.wgsl");

/// Density field accumulation and blur
pub const DENSITY: &str = include_str!("density.wgsl");

/// Three-pass downsample: cull, probabilistic accept, compact
pub const DOWNSAMPLE: &str = include_str!("downsample.wgsl");

/// Instanced point quads, direct and index-buffer driven
pub const POINTS: &str = include_str!("points.wgsl");

/// Full source for a stage.
pub fn assemble(stage: &str) -> String {
    format!("{}\n{}", COMMON, stage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points_present() {
        assert!(DENSITY.contains("fn density_accumulate"));
        assert!(DENSITY.contains("fn density_blur"));
        assert!(DOWNSAMPLE.contains("fn downsample_viewport_cull"));
        assert!(DOWNSAMPLE.contains("fn downsample_density_sample"));
        assert!(DOWNSAMPLE.contains("fn downsample_compact"));
        assert!(POINTS.contains("fn points_vs"));
        assert!(POINTS.contains("fn points_indexed_vs"));
        assert!(POINTS.contains("fn points_fs"));
    }

    #[test]
    fn test_row_stride_matches_dispatch() {
        let stride = format!(
            "const THREADS_PER_ROW: u32 = {}u;",
            crate::downsample::THREADS_PER_ROW
        );
        assert!(COMMON.contains(&stride));
        let size = format!(
            "@workgroup_size({})",
            crate::downsample::WORKGROUP_SIZE
        );
        assert!(DOWNSAMPLE.contains(&size));
    }
}
