// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Limits the per-tick derivatives of commanded signals to the kinematic
//! limits of the arm.

use nalgebra::{UnitQuaternion, Vector3};

use crate::robot::control_tools::array_to_isometry;

/// Sample time constant
pub static DELTA_T: f64 = 1e-3;
/// Epsilon value for checking limits
pub static LIMIT_EPS: f64 = 1e-3;
/// Number of lost ticks tolerated in the definition of the velocity limits.
/// For a lost tick the robot assumes a constant acceleration model.
pub static TOL_NUMBER_PACKETS_LOST: f64 = 1e-3;
/// Maximum torque rate
pub static MAX_TORQUE_RATE: [f64; 7] = [1000. - LIMIT_EPS; 7];
/// Maximum joint jerk
pub static MAX_JOINT_JERK: [f64; 7] = [
    7500.0 - LIMIT_EPS,
    3750.0 - LIMIT_EPS,
    5000.0 - LIMIT_EPS,
    6250.0 - LIMIT_EPS,
    7500.0 - LIMIT_EPS,
    10000.0 - LIMIT_EPS,
    10000.0 - LIMIT_EPS,
];
/// Maximum joint acceleration
pub static MAX_JOINT_ACCELERATION: [f64; 7] = [
    15.0000 - LIMIT_EPS,
    7.500 - LIMIT_EPS,
    10.0000 - LIMIT_EPS,
    12.5000 - LIMIT_EPS,
    15.0000 - LIMIT_EPS,
    20.0000 - LIMIT_EPS,
    20.0000 - LIMIT_EPS,
];
/// Maximum joint velocity
pub static MAX_JOINT_VELOCITY: [f64; 7] = [
    2.1750 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_JOINT_ACCELERATION[0],
    2.1750 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_JOINT_ACCELERATION[1],
    2.1750 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_JOINT_ACCELERATION[2],
    2.1750 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_JOINT_ACCELERATION[3],
    2.6100 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_JOINT_ACCELERATION[4],
    2.6100 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_JOINT_ACCELERATION[5],
    2.6100 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_JOINT_ACCELERATION[6],
];
/// Maximum translational jerk
pub static MAX_TRANSLATIONAL_JERK: f64 = 6500.0 - LIMIT_EPS;
/// Maximum translational acceleration
pub static MAX_TRANSLATIONAL_ACCELERATION: f64 = 13.0000 - LIMIT_EPS;
/// Maximum translational velocity
pub static MAX_TRANSLATIONAL_VELOCITY: f64 =
    2.0000 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_TRANSLATIONAL_ACCELERATION;
/// Maximum rotational jerk
pub static MAX_ROTATIONAL_JERK: f64 = 12500.0 - LIMIT_EPS;
/// Maximum rotational acceleration
pub static MAX_ROTATIONAL_ACCELERATION: f64 = 25.0000 - LIMIT_EPS;
/// Maximum rotational velocity
pub static MAX_ROTATIONAL_VELOCITY: f64 =
    2.5000 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_ROTATIONAL_ACCELERATION;
/// Maximum elbow jerk
pub static MAX_ELBOW_JERK: f64 = 5000. - LIMIT_EPS;
/// Maximum elbow acceleration
pub static MAX_ELBOW_ACCELERATION: f64 = 10.0000 - LIMIT_EPS;
/// Maximum elbow velocity
pub static MAX_ELBOW_VELOCITY: f64 =
    2.1750 - LIMIT_EPS - TOL_NUMBER_PACKETS_LOST * DELTA_T * MAX_ELBOW_ACCELERATION;

/// Limits the rate of change of a vector of torques.
///
/// # Panics
/// If a commanded torque is not finite.
pub fn limit_rate_torques(
    max_derivatives: &[f64; 7],
    commanded_values: &[f64; 7],
    last_commanded_values: &[f64; 7],
) -> [f64; 7] {
    commanded_values.iter().for_each(|x| assert!(x.is_finite()));
    let mut limited_values = [0.; 7];
    for i in 0..7 {
        let commanded_derivative = (commanded_values[i] - last_commanded_values[i]) / DELTA_T;
        limited_values[i] = last_commanded_values[i]
            + commanded_derivative.clamp(-max_derivatives[i], max_derivatives[i]) * DELTA_T;
    }
    limited_values
}

/// Limits one commanded velocity such that velocity, acceleration and jerk
/// stay inside the given bounds, based on the previous commanded velocity
/// and acceleration.
///
/// # Panics
/// If the commanded velocity is not finite.
pub fn limit_rate_velocity(
    max_velocity: f64,
    max_acceleration: f64,
    max_jerk: f64,
    commanded_velocity: f64,
    last_commanded_velocity: f64,
    last_commanded_acceleration: f64,
) -> f64 {
    assert!(commanded_velocity.is_finite());
    let commanded_jerk = ((commanded_velocity - last_commanded_velocity) / DELTA_T
        - last_commanded_acceleration)
        / DELTA_T;
    let commanded_acceleration =
        last_commanded_acceleration + commanded_jerk.clamp(-max_jerk, max_jerk) * DELTA_T;
    let safe_max_acceleration = f64::min(
        (max_jerk / max_acceleration) * (max_velocity - last_commanded_velocity),
        max_acceleration,
    );
    let safe_min_acceleration = f64::max(
        (max_jerk / max_acceleration) * (-max_velocity - last_commanded_velocity),
        -max_acceleration,
    );
    last_commanded_velocity
        + f64::max(
            f64::min(commanded_acceleration, safe_max_acceleration),
            safe_min_acceleration,
        ) * DELTA_T
}

/// Limits one commanded position by limiting the velocity needed to reach
/// it within a tick.
///
/// # Panics
/// If the commanded position is not finite.
pub fn limit_rate_position(
    max_velocity: f64,
    max_acceleration: f64,
    max_jerk: f64,
    commanded_position: f64,
    last_commanded_position: f64,
    last_commanded_velocity: f64,
    last_commanded_acceleration: f64,
) -> f64 {
    assert!(commanded_position.is_finite());
    last_commanded_position
        + limit_rate_velocity(
            max_velocity,
            max_acceleration,
            max_jerk,
            (commanded_position - last_commanded_position) / DELTA_T,
            last_commanded_velocity,
            last_commanded_acceleration,
        ) * DELTA_T
}

/// Per-joint [`limit_rate_position`].
pub fn limit_rate_joint_positions(
    max_velocity: &[f64; 7],
    max_acceleration: &[f64; 7],
    max_jerk: &[f64; 7],
    commanded_positions: &[f64; 7],
    last_commanded_positions: &[f64; 7],
    last_commanded_velocities: &[f64; 7],
    last_commanded_accelerations: &[f64; 7],
) -> [f64; 7] {
    let mut limited = [0.; 7];
    for i in 0..7 {
        limited[i] = limit_rate_position(
            max_velocity[i],
            max_acceleration[i],
            max_jerk[i],
            commanded_positions[i],
            last_commanded_positions[i],
            last_commanded_velocities[i],
            last_commanded_accelerations[i],
        );
    }
    limited
}

/// Per-joint [`limit_rate_velocity`].
pub fn limit_rate_joint_velocities(
    max_velocity: &[f64; 7],
    max_acceleration: &[f64; 7],
    max_jerk: &[f64; 7],
    commanded_velocities: &[f64; 7],
    last_commanded_velocities: &[f64; 7],
    last_commanded_accelerations: &[f64; 7],
) -> [f64; 7] {
    let mut limited = [0.; 7];
    for i in 0..7 {
        limited[i] = limit_rate_velocity(
            max_velocity[i],
            max_acceleration[i],
            max_jerk[i],
            commanded_velocities[i],
            last_commanded_velocities[i],
            last_commanded_accelerations[i],
        );
    }
    limited
}

/// Limits a commanded Cartesian velocity. The translational and the
/// rotational part are limited independently, each by the norm of its
/// three-component sub-vector.
///
/// # Panics
/// If a commanded value is not finite.
pub fn limit_rate_cartesian_velocity(
    max_translational_velocity: f64,
    max_translational_acceleration: f64,
    max_translational_jerk: f64,
    max_rotational_velocity: f64,
    max_rotational_acceleration: f64,
    max_rotational_jerk: f64,
    commanded_velocities: &[f64; 6],
    last_commanded_velocities: &[f64; 6],
    last_commanded_accelerations: &[f64; 6],
) -> [f64; 6] {
    commanded_velocities
        .iter()
        .for_each(|x| assert!(x.is_finite()));
    let mut limited = [0.; 6];
    let translation = limit_rate_subvector(
        max_translational_velocity,
        max_translational_acceleration,
        max_translational_jerk,
        &[
            commanded_velocities[0],
            commanded_velocities[1],
            commanded_velocities[2],
        ],
        &[
            last_commanded_velocities[0],
            last_commanded_velocities[1],
            last_commanded_velocities[2],
        ],
        &[
            last_commanded_accelerations[0],
            last_commanded_accelerations[1],
            last_commanded_accelerations[2],
        ],
    );
    let rotation = limit_rate_subvector(
        max_rotational_velocity,
        max_rotational_acceleration,
        max_rotational_jerk,
        &[
            commanded_velocities[3],
            commanded_velocities[4],
            commanded_velocities[5],
        ],
        &[
            last_commanded_velocities[3],
            last_commanded_velocities[4],
            last_commanded_velocities[5],
        ],
        &[
            last_commanded_accelerations[3],
            last_commanded_accelerations[4],
            last_commanded_accelerations[5],
        ],
    );
    limited[..3].copy_from_slice(&translation);
    limited[3..].copy_from_slice(&rotation);
    limited
}

/// Limits the norm of a three-component velocity vector the same way
/// [`limit_rate_velocity`] limits a scalar.
fn limit_rate_subvector(
    max_velocity: f64,
    max_acceleration: f64,
    max_jerk: f64,
    commanded: &[f64; 3],
    last_commanded: &[f64; 3],
    last_acceleration: &[f64; 3],
) -> [f64; 3] {
    let norm =
        |v: &[f64; 3]| -> f64 { (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt() };
    let commanded_jerk = [
        ((commanded[0] - last_commanded[0]) / DELTA_T - last_acceleration[0]) / DELTA_T,
        ((commanded[1] - last_commanded[1]) / DELTA_T - last_acceleration[1]) / DELTA_T,
        ((commanded[2] - last_commanded[2]) / DELTA_T - last_acceleration[2]) / DELTA_T,
    ];
    let jerk_norm = norm(&commanded_jerk);
    let jerk_scale = if jerk_norm > max_jerk {
        max_jerk / jerk_norm
    } else {
        1.
    };
    let mut acceleration = [0.; 3];
    for i in 0..3 {
        acceleration[i] = last_acceleration[i] + commanded_jerk[i] * jerk_scale * DELTA_T;
    }
    let acceleration_norm = norm(&acceleration);
    let acceleration_scale = if acceleration_norm > max_acceleration {
        max_acceleration / acceleration_norm
    } else {
        1.
    };
    let mut velocity = [0.; 3];
    for i in 0..3 {
        velocity[i] = last_commanded[i] + acceleration[i] * acceleration_scale * DELTA_T;
    }
    let velocity_norm = norm(&velocity);
    let velocity_scale = if velocity_norm > max_velocity {
        max_velocity / velocity_norm
    } else {
        1.
    };
    for value in velocity.iter_mut() {
        *value *= velocity_scale;
    }
    velocity
}

/// Limits a commanded Cartesian pose by limiting the twist needed to reach
/// it from the last commanded pose within one tick, then re-integrating the
/// clamped twist.
///
/// # Panics
/// If an element of the commanded pose is not finite.
#[allow(clippy::too_many_arguments)]
pub fn limit_rate_cartesian_pose(
    max_translational_velocity: f64,
    max_translational_acceleration: f64,
    max_translational_jerk: f64,
    max_rotational_velocity: f64,
    max_rotational_acceleration: f64,
    max_rotational_jerk: f64,
    commanded_pose: &[f64; 16],
    last_commanded_pose: &[f64; 16],
    last_commanded_velocities: &[f64; 6],
    last_commanded_accelerations: &[f64; 6],
) -> [f64; 16] {
    commanded_pose.iter().for_each(|x| assert!(x.is_finite()));
    let commanded = array_to_isometry(commanded_pose);
    let last = array_to_isometry(last_commanded_pose);

    let translational_velocity =
        (commanded.translation.vector - last.translation.vector) / DELTA_T;
    let rotational_velocity =
        (commanded.rotation * last.rotation.inverse()).scaled_axis() / DELTA_T;
    let twist = [
        translational_velocity[0],
        translational_velocity[1],
        translational_velocity[2],
        rotational_velocity[0],
        rotational_velocity[1],
        rotational_velocity[2],
    ];
    let limited = limit_rate_cartesian_velocity(
        max_translational_velocity,
        max_translational_acceleration,
        max_translational_jerk,
        max_rotational_velocity,
        max_rotational_acceleration,
        max_rotational_jerk,
        &twist,
        last_commanded_velocities,
        last_commanded_accelerations,
    );

    let mut result = last;
    result.translation.vector += Vector3::new(limited[0], limited[1], limited[2]) * DELTA_T;
    result.rotation = UnitQuaternion::from_scaled_axis(
        Vector3::new(limited[3], limited[4], limited[5]) * DELTA_T,
    ) * last.rotation;
    let mut out = [0.; 16];
    for (i, &x) in result.to_homogeneous().iter().enumerate() {
        out[i] = x;
    }
    out
}
