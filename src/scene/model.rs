// Mesh models loaded from Wavefront OBJ files

use anyhow::{bail, Context, Result};
use glam::Mat4;
use std::path::Path;
use std::sync::Arc;
use super::mesh::{Mesh, MeshData};
use super::vertex::{calc_average_normals, Vertex};
use crate::backend::commands::TransferContext;
use crate::backend::VulkanDevice;

/// Several meshes sharing one model matrix
pub struct MeshModel {
    meshes: Vec<Mesh>,
}

/// One OBJ object ready for upload
#[derive(Debug, Clone)]
pub struct ObjMesh {
    pub data: MeshData,
    pub material: Option<usize>,
}

impl MeshModel {
    pub fn new(meshes: Vec<Mesh>) -> Self {
        Self { meshes }
    }

    /// Load an OBJ file and upload every object in it.
    ///
    /// `load_texture` is called with each material's diffuse texture file
    /// name and returns a texture id; materials without one use id 0.
    pub fn load<F>(
        device: &Arc<VulkanDevice>,
        transfer: TransferContext,
        path: &Path,
        mut load_texture: F,
    ) -> Result<Self>
    where
        F: FnMut(&str) -> Result<usize>,
    {
        let (objects, textures) = load_obj(path)?;

        let mut material_to_texture = Vec::with_capacity(textures.len());
        for texture in &textures {
            let id = match texture {
                Some(file) => load_texture(file).unwrap_or_else(|e| {
                    log::warn!("Texture {} for {:?} unavailable: {:#}", file, path, e);
                    0
                }),
                None => 0,
            };
            material_to_texture.push(id);
        }

        let meshes = objects
            .iter()
            .map(|object| {
                let texture_id = object
                    .material
                    .and_then(|m| material_to_texture.get(m).copied())
                    .unwrap_or(0);
                Mesh::new(device, transfer, &object.data, texture_id)
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Failed to upload model {:?}", path))?;

        log::info!("Loaded {:?}: {} meshes, {} materials", path, meshes.len(), textures.len());
        Ok(Self::new(meshes))
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn get_mesh(&self, index: usize) -> Result<&Mesh> {
        self.meshes
            .get(index)
            .with_context(|| format!("Mesh index {} out of range ({} meshes)", index, self.meshes.len()))
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn set_model(&mut self, model: Mat4) {
        for mesh in &mut self.meshes {
            mesh.set_model(model);
        }
    }

    pub fn set_texture(&mut self, enabled: bool) {
        for mesh in &mut self.meshes {
            mesh.set_texture(enabled);
        }
    }
}

/// Diffuse texture file name per material, directories stripped
pub fn load_materials(materials: &[tobj::Material]) -> Vec<Option<String>> {
    materials
        .iter()
        .map(|material| {
            material
                .diffuse_texture
                .as_deref()
                .map(texture_file_name)
                .filter(|name| !name.is_empty())
        })
        .collect()
}

/// Strip any directory part, with either separator
pub fn texture_file_name(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

/// Parse an OBJ file into per-object geometry and material texture names
pub fn load_obj(path: &Path) -> Result<(Vec<ObjMesh>, Vec<Option<String>>)> {
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };

    let (models, materials) =
        tobj::load_obj(path, &options).with_context(|| format!("Failed to load model {:?}", path))?;

    let textures = match materials {
        Ok(materials) => load_materials(&materials),
        Err(e) => {
            log::warn!("No materials for {:?}: {}", path, e);
            Vec::new()
        }
    };

    let objects = models
        .iter()
        .map(|model| {
            Ok(ObjMesh {
                data: mesh_data(&model.mesh)
                    .with_context(|| format!("In object '{}' of {:?}", model.name, path))?,
                material: model.mesh.material_id,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if objects.is_empty() {
        bail!("Model {:?} contains no objects", path);
    }

    Ok((objects, textures))
}

fn mesh_data(mesh: &tobj::Mesh) -> Result<MeshData> {
    let count = mesh.positions.len() / 3;
    let has_normals = mesh.normals.len() == count * 3;
    let has_texcoords = mesh.texcoords.len() == count * 2;
    let has_colours = mesh.vertex_color.len() == count * 3;

    let mut vertices: Vec<Vertex> = (0..count)
        .map(|i| {
            let pos = [mesh.positions[3 * i], mesh.positions[3 * i + 1], mesh.positions[3 * i + 2]];
            let col = if has_colours {
                [mesh.vertex_color[3 * i], mesh.vertex_color[3 * i + 1], mesh.vertex_color[3 * i + 2]]
            } else {
                [1.0; 3]
            };
            // OBJ puts V=0 at the bottom
            let tex = if has_texcoords {
                [mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1]]
            } else {
                [0.0; 2]
            };
            let normal = if has_normals {
                [mesh.normals[3 * i], mesh.normals[3 * i + 1], mesh.normals[3 * i + 2]]
            } else {
                [0.0; 3]
            };
            Vertex::new(pos, col, tex, normal)
        })
        .collect();

    if !has_normals {
        calc_average_normals(&mesh.indices, &mut vertices)?;
    }

    Ok(MeshData {
        vertices,
        indices: mesh.indices.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn texture_paths_lose_their_directories() {
        assert_eq!(texture_file_name("textures\\brick.png"), "brick.png");
        assert_eq!(texture_file_name("C:\\assets\\tex/wood.jpg"), "wood.jpg");
        assert_eq!(texture_file_name("../textures/giraffe.jpg"), "giraffe.jpg");
        assert_eq!(texture_file_name("plain.png"), "plain.png");
    }

    #[test]
    fn materials_without_diffuse_map_to_none() {
        let materials = vec![
            tobj::Material {
                diffuse_texture: Some("maps\\diffuse.png".into()),
                ..Default::default()
            },
            tobj::Material::default(),
        ];
        assert_eq!(
            load_materials(&materials),
            vec![Some("diffuse.png".to_string()), None]
        );
    }

    #[test]
    fn empty_model_rejects_mesh_lookup() {
        let mut model = MeshModel::new(Vec::new());
        model.set_model(Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0)));
        model.set_texture(false);
        assert_eq!(model.mesh_count(), 0);
        assert!(model.get_mesh(0).is_err());
    }

    #[test]
    fn obj_without_normals_gets_averaged_normals() {
        let path = std::env::temp_dir().join(format!("scene_renderer_quad_{}.obj", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "o quad").unwrap();
            writeln!(file, "v -1 -1 0\nv 1 -1 0\nv 1 1 0\nv -1 1 0").unwrap();
            writeln!(file, "vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1").unwrap();
            writeln!(file, "f 1/1 2/2 3/3 4/4").unwrap();
        }

        let (objects, textures) = load_obj(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(textures.is_empty());
        assert_eq!(objects.len(), 1);
        let data = &objects[0].data;
        assert_eq!(data.indices.len(), 6);
        for vertex in &data.vertices {
            assert_eq!(vertex.normal, [0.0, 0.0, 1.0]);
            assert_eq!(vertex.col, [1.0; 3]);
        }
        // First corner had V=0, flipped to the top-left convention
        let first = data.vertices.iter().find(|v| v.pos == [-1.0, -1.0, 0.0]).unwrap();
        assert_eq!(first.tex, [0.0, 1.0]);
    }
}
