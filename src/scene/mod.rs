// Scene data: geometry, uniforms, lights and the camera

pub mod camera;
pub mod light;
pub mod mesh;
pub mod model;
pub mod primitives;
pub mod uniforms;
pub mod vertex;

pub use camera::Camera;
pub use light::DirectionalLight;
pub use mesh::{Mesh, MeshData};
pub use model::MeshModel;
