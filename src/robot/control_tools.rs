// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Small geometric helpers for the control types.

use nalgebra::{Isometry3, Matrix4, Rotation3, Vector3};

/// Converts a column-major 4x4 pose array into an isometry.
pub(crate) fn array_to_isometry(array: &[f64; 16]) -> Isometry3<f64> {
    let rotation = Rotation3::from_matrix(
        &Matrix4::from_column_slice(array)
            .remove_column(3)
            .remove_row(3),
    );
    Isometry3::from_parts(
        Vector3::new(array[12], array[13], array[14]).into(),
        rotation.into(),
    )
}

/// Determines whether the given column-major 4x4 array represents a valid
/// homogeneous transformation matrix.
pub fn is_homogeneous_transformation(transform: &[f64; 16]) -> bool {
    const ORTHONORMAL_THRESHOLD: f64 = 1e-5;
    if transform[3] != 0.0 || transform[7] != 0.0 || transform[11] != 0.0 || transform[15] != 1.0 {
        return false;
    }
    for j in 0..3 {
        let column_norm = (transform[j * 4].powi(2)
            + transform[j * 4 + 1].powi(2)
            + transform[j * 4 + 2].powi(2))
        .sqrt();
        if (column_norm - 1.).abs() > ORTHONORMAL_THRESHOLD {
            return false;
        }
    }
    for i in 0..3 {
        let row_norm =
            (transform[i].powi(2) + transform[4 + i].powi(2) + transform[8 + i].powi(2)).sqrt();
        if (row_norm - 1.).abs() > ORTHONORMAL_THRESHOLD {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::is_homogeneous_transformation;

    const IDENTITY: [f64; 16] = [
        1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1.,
    ];

    #[test]
    fn identity_is_homogeneous() {
        assert!(is_homogeneous_transformation(&IDENTITY));
    }

    #[test]
    fn scaled_rotation_is_not_homogeneous() {
        let mut transform = IDENTITY;
        transform[0] = 2.;
        assert!(!is_homogeneous_transformation(&transform));
    }

    #[test]
    fn nonzero_bottom_row_is_not_homogeneous() {
        let mut transform = IDENTITY;
        transform[3] = 0.5;
        assert!(!is_homogeneous_transformation(&transform));
    }
}
