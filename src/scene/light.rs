// Lights
//
// A Light is colour and intensities; a DirectionalLight adds a direction and
// knows how to build the orthographic view used for the shadow map.

use glam::{Mat4, Vec3};
use super::uniforms::UniformLight;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub colour: Vec3,
    pub ambient_intensity: f32,
    pub diffuse_intensity: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            colour: Vec3::ONE,
            ambient_intensity: 1.0,
            diffuse_intensity: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub light: Light,
    direction: Vec3,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            light: Light::default(),
            direction: Vec3::NEG_Y,
        }
    }
}

impl DirectionalLight {
    pub fn new(colour: Vec3, ambient_intensity: f32, direction: Vec3, diffuse_intensity: f32) -> Self {
        let mut light = Self::default();
        light.update(
            Some(direction),
            Some(colour),
            Some(ambient_intensity),
            Some(diffuse_intensity),
        );
        light
    }

    /// Replace whichever values are given. A zero direction is ignored.
    pub fn update(
        &mut self,
        direction: Option<Vec3>,
        colour: Option<Vec3>,
        ambient_intensity: Option<f32>,
        diffuse_intensity: Option<f32>,
    ) {
        if let Some(direction) = direction {
            match direction.try_normalize() {
                Some(direction) => self.direction = direction,
                None => log::warn!("Ignoring zero light direction"),
            }
        }
        if let Some(colour) = colour {
            self.light.colour = colour;
        }
        if let Some(ambient) = ambient_intensity {
            self.light.ambient_intensity = ambient;
        }
        if let Some(diffuse) = diffuse_intensity {
            self.light.diffuse_intensity = diffuse;
        }
    }

    /// Unit direction the light travels in
    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn uniform(&self) -> UniformLight {
        UniformLight::new(
            self.light.colour,
            self.light.ambient_intensity,
            self.direction,
            self.light.diffuse_intensity,
        )
    }

    /// Orthographic projection * view from the light, covering a box of
    /// half-size `extent` around the origin. Depth is 0..1, Y is not flipped.
    pub fn light_space_matrix(&self, extent: f32, near: f32, far: f32) -> Mat4 {
        let eye = -self.direction * (far * 0.5);

        // look_at breaks down when looking straight along up
        let up = if self.direction.dot(Vec3::Y).abs() > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };

        let view = Mat4::look_at_rh(eye, Vec3::ZERO, up);
        let projection = Mat4::orthographic_rh(-extent, extent, -extent, extent, near, far);
        projection * view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_full_ambient_white_from_above() {
        let light = DirectionalLight::default();
        assert_eq!(light.light.colour, Vec3::ONE);
        assert_eq!(light.light.ambient_intensity, 1.0);
        assert_eq!(light.light.diffuse_intensity, 0.0);
        assert_eq!(light.direction(), Vec3::NEG_Y);
    }

    #[test]
    fn partial_update_keeps_other_values() {
        let mut light = DirectionalLight::default();
        light.update(None, Some(Vec3::new(1.0, 0.5, 0.0)), None, Some(0.7));

        let uniform = light.uniform();
        assert_eq!(uniform.colour, [1.0, 0.5, 0.0]);
        assert_eq!(uniform.ambient_intensity, 1.0);
        assert_eq!(uniform.diffuse_intensity, 0.7);
        assert_eq!(uniform.direction, [0.0, -1.0, 0.0]);
    }

    #[test]
    fn zero_direction_is_rejected() {
        let mut light = DirectionalLight::new(Vec3::ONE, 0.2, Vec3::new(2.0, 0.0, 0.0), 0.8);
        assert_eq!(light.direction(), Vec3::X);

        light.update(Some(Vec3::ZERO), None, None, None);
        assert_eq!(light.direction(), Vec3::X);
    }

    #[test]
    fn origin_lands_inside_shadow_volume() {
        for direction in [Vec3::NEG_Y, Vec3::new(-0.4, -1.0, -0.3), Vec3::X] {
            let light = DirectionalLight::new(Vec3::ONE, 0.2, direction, 0.8);
            let clip = light.light_space_matrix(10.0, 0.1, 40.0) * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
            let ndc = clip.truncate() / clip.w;

            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "{:?}", ndc);
            assert!(ndc.z > 0.0 && ndc.z < 1.0, "{:?}", ndc);
        }
    }
}
