//! Stack geometry: slice normal, ordering along it, and consistency checks.

use crate::instance::Instance;

use glam::DVec3;
use log::warn;
use thiserror::Error;

/// Tolerance for orientation cosines, pixel spacing and duplicate positions.
pub const GEOMETRY_EPSILON: f64 = 1e-3;
/// Relative deviation of a slice gap from the mean gap that triggers a warning.
pub const SPACING_DEVIATION: f64 = 0.1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("Cannot sort an empty stack")]
    EmptyStack,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Instances in stack order together with the inferred geometry.
#[derive(Debug, Clone)]
pub struct SortedStack {
    pub sorted: Vec<Instance>,
    /// Mean distance between consecutive slices along `normal`, in mm.
    pub average_spacing: f64,
    pub normal: DVec3,
}

/// Unit cross product of the row and column direction cosines.
///
/// Degenerate (parallel or zero) cosines give the zero vector.
pub fn compute_normal(orientation: &[f64; 6]) -> DVec3 {
    let row = DVec3::new(orientation[0], orientation[1], orientation[2]);
    let column = DVec3::new(orientation[3], orientation[4], orientation[5]);
    row.cross(column).normalize_or_zero()
}

/// Position of a slice along the stack axis.
pub fn project_onto_normal(position: &[f64; 3], normal: DVec3) -> f64 {
    DVec3::from_array(*position).dot(normal)
}

/// Orders instances by their projected position, ascending.
///
/// The normal is taken from the first instance as given. With fewer than two
/// instances the spacing falls back to the slice thickness, then to 1 mm.
pub fn sort_by_position(instances: &[Instance]) -> Result<SortedStack, GeometryError> {
    let first = instances.first().ok_or(GeometryError::EmptyStack)?;
    let normal = compute_normal(&first.image_orientation_patient);

    let mut projected: Vec<(f64, &Instance)> = instances
        .iter()
        .map(|instance| {
            (
                project_onto_normal(&instance.image_position_patient, normal),
                instance,
            )
        })
        .collect();
    projected.sort_by(|a, b| a.0.total_cmp(&b.0));

    let average_spacing = if projected.len() < 2 {
        first.slice_thickness.unwrap_or(1.0)
    } else {
        let gaps: f64 = projected.windows(2).map(|pair| pair[1].0 - pair[0].0).sum();
        gaps / (projected.len() - 1) as f64
    };

    Ok(SortedStack {
        sorted: projected
            .into_iter()
            .map(|(_, instance)| instance.clone())
            .collect(),
        average_spacing,
        normal,
    })
}

/// Checks that `instances` form one reconstructable stack.
///
/// Ordering is re-derived here; the caller's order is not trusted.
pub fn validate(instances: &[Instance]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if instances.len() < 2 {
        errors.push(format!(
            "At least 2 slices are required, got {}",
            instances.len()
        ));
    }

    if let Some(first) = instances.first() {
        for instance in &instances[1..] {
            if (instance.rows, instance.columns) != (first.rows, first.columns) {
                errors.push(format!(
                    "Slice {} is {}x{}, expected {}x{}",
                    instance.id, instance.rows, instance.columns, first.rows, first.columns
                ));
            }
            let orientation_differs = instance
                .image_orientation_patient
                .iter()
                .zip(&first.image_orientation_patient)
                .any(|(a, b)| (a - b).abs() > GEOMETRY_EPSILON);
            if orientation_differs {
                errors.push(format!(
                    "Slice {} has orientation {:?}, expected {:?}",
                    instance.id, instance.image_orientation_patient, first.image_orientation_patient
                ));
            }
            let spacing_differs = instance
                .pixel_spacing
                .iter()
                .zip(&first.pixel_spacing)
                .any(|(a, b)| (a - b).abs() >= GEOMETRY_EPSILON);
            if spacing_differs {
                warnings.push(format!(
                    "Slice {} has pixel spacing {:?}, expected {:?}",
                    instance.id, instance.pixel_spacing, first.pixel_spacing
                ));
            }
        }
    }

    if let Ok(stack) = sort_by_position(instances) {
        let positions: Vec<f64> = stack
            .sorted
            .iter()
            .map(|instance| project_onto_normal(&instance.image_position_patient, stack.normal))
            .collect();

        for (pair, ids) in positions.windows(2).zip(stack.sorted.windows(2)) {
            let gap = pair[1] - pair[0];
            if gap < GEOMETRY_EPSILON {
                errors.push(format!(
                    "Slices {} and {} share position {:.3}",
                    ids[0].id, ids[1].id, pair[0]
                ));
            } else if (gap - stack.average_spacing).abs()
                > SPACING_DEVIATION * stack.average_spacing
            {
                warnings.push(format!(
                    "Gap of {gap:.3} mm between {} and {} deviates from the mean spacing of {:.3} mm",
                    ids[0].id, ids[1].id, stack.average_spacing
                ));
            }
        }
    }

    for warning in &warnings {
        warn!("{warning}");
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_instance;
    use rstest::rstest;

    fn stack(zs: &[f64]) -> Vec<Instance> {
        zs.iter()
            .enumerate()
            .map(|(i, &z)| test_instance(&format!("slice-{i}"), 2, 2, z))
            .collect()
    }

    #[test]
    fn axial_stack_resolves_normal_and_spacing() {
        let sorted = sort_by_position(&stack(&[0.0, 10.0, 20.0])).unwrap();
        assert_eq!(sorted.normal, DVec3::Z);
        assert!((sorted.average_spacing - 10.0).abs() < 1e-9);
    }

    #[rstest]
    #[case(&[20.0, 0.0, 10.0])]
    #[case(&[-5.0, 7.5, -100.0, 3.0])]
    #[case(&[1.0, 1.0, 0.5])]
    fn sorted_positions_never_decrease(#[case] zs: &[f64]) {
        let sorted = sort_by_position(&stack(zs)).unwrap();
        let positions: Vec<f64> = sorted
            .sorted
            .iter()
            .map(|instance| project_onto_normal(&instance.image_position_patient, sorted.normal))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn sorts_along_oblique_normal() {
        // Sagittal: rows along y, columns along -z, normal along -x.
        let orientation = [0.0, 1.0, 0.0, 0.0, 0.0, -1.0];
        let instances: Vec<Instance> = [3.0, 1.0, 2.0]
            .iter()
            .map(|&x| Instance {
                image_orientation_patient: orientation,
                image_position_patient: [x, 0.0, 0.0],
                ..test_instance(&format!("x{x}"), 2, 2, 0.0)
            })
            .collect();

        let sorted = sort_by_position(&instances).unwrap();
        assert_eq!(sorted.normal, DVec3::new(-1.0, 0.0, 0.0));
        let ids: Vec<&str> = sorted.sorted.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["x3", "x2", "x1"]);
    }

    #[test]
    fn unnormalized_cosines_do_not_scale_spacing() {
        let instances: Vec<Instance> = [0.0, 3.0, 6.0]
            .iter()
            .map(|&z| Instance {
                image_orientation_patient: [2.0, 0.0, 0.0, 0.0, 1.5, 0.0],
                ..test_instance(&format!("z{z}"), 2, 2, z)
            })
            .collect();

        let sorted = sort_by_position(&instances).unwrap();
        assert_eq!(sorted.normal, DVec3::Z);
        assert!((sorted.average_spacing - 3.0).abs() < 1e-9);
    }

    #[test]
    fn single_instance_falls_back_to_thickness() {
        let sorted = sort_by_position(&stack(&[4.0])).unwrap();
        assert_eq!(sorted.average_spacing, 2.0);

        let instance = Instance {
            slice_thickness: None,
            ..test_instance("only", 2, 2, 0.0)
        };
        assert_eq!(sort_by_position(&[instance]).unwrap().average_spacing, 1.0);
    }

    #[test]
    fn empty_stack_cannot_be_sorted() {
        assert_eq!(
            sort_by_position(&[]).unwrap_err(),
            GeometryError::EmptyStack
        );
    }

    #[test]
    fn regular_stack_is_valid() {
        let result = validate(&stack(&[0.0, 2.0, 4.0, 6.0]));
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn duplicate_position_is_an_error() {
        let result = validate(&stack(&[5.0, 5.0]));
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("share position")));
    }

    #[test]
    fn mismatched_dimensions_are_an_error() {
        let mut instances = stack(&[0.0, 1.0]);
        instances[1].columns = 3;
        let result = validate(&instances);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("expected 2x2")));
    }

    #[test]
    fn mismatched_orientation_is_an_error() {
        let mut instances = stack(&[0.0, 1.0]);
        instances[1].image_orientation_patient[1] = 0.01;
        assert!(!validate(&instances).valid);
    }

    #[test]
    fn too_few_slices_is_an_error() {
        assert!(!validate(&stack(&[0.0])).valid);
        assert!(!validate(&[]).valid);
    }

    #[test]
    fn spacing_irregularities_are_warnings() {
        let mut instances = stack(&[0.0, 1.0, 2.0, 4.0]);
        instances[2].pixel_spacing = [0.6, 0.5];
        let result = validate(&instances);

        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.contains("pixel spacing")));
        assert!(result.warnings.iter().any(|w| w.contains("deviates")));
    }
}
