//! Scene & Default-Asset Collaborator Seams
//!
//! Cleanup and deep-touch consult each attached scene for the set of asset
//! UUIDs it currently references, so live assets are spared from pruning
//! and missing ones can be repopulated. A scene reports its references in
//! five categories; the cache unions them into one `uuid -> type hint` map.

use std::collections::HashMap;

use uuid::Uuid;

use crate::asset::Asset;

/// Loose classification of where a referenced UUID came from.
///
/// Used only as a hint when logging and deep-touching; the cache never
/// interprets the value beyond passing it along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Terrain textures (4 legacy + 4 PBR + 1 composite)
    Terrain,
    /// Region-wide environment references
    Environment,
    /// Per-parcel environment references
    Parcel,
    /// Object group contents, recursively gathered by the scene
    Object,
    /// Avatar bake textures (child agents and default bakes excluded)
    Bake,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceKind::Terrain => write!(f, "terrain"),
            ReferenceKind::Environment => write!(f, "environment"),
            ReferenceKind::Parcel => write!(f, "parcel"),
            ReferenceKind::Object => write!(f, "object"),
            ReferenceKind::Bake => write!(f, "bake"),
        }
    }
}

/// A scene the cache is attached to.
///
/// Implementations flatten their own hierarchies (object groups are walked
/// recursively on the scene side; child agents and default avatar textures
/// are excluded from bake reporting).
pub trait SceneView: Send + Sync {
    /// Stable region identifier, used for status stamps and idempotent
    /// attach/detach.
    fn region_id(&self) -> Uuid;

    /// Terrain texture UUIDs (4 legacy + 4 PBR + 1 composite)
    fn terrain_textures(&self) -> Vec<Uuid>;

    /// Region environment's referenced UUIDs
    fn environment_assets(&self) -> Vec<Uuid>;

    /// Each parcel's environment-referenced UUIDs
    fn parcel_environment_assets(&self) -> Vec<Uuid>;

    /// Each object group's gathered UUIDs (already recursive)
    fn object_assets(&self) -> Vec<Uuid>;

    /// Each avatar presence's bake-texture UUIDs
    fn avatar_bake_textures(&self) -> Vec<Uuid>;
}

/// Union one scene's references into `gathered`.
///
/// Later categories do not overwrite earlier hints for the same UUID, so a
/// texture that is both terrain and object keeps the terrain hint.
pub fn gather_scene_references(
    scene: &dyn SceneView,
    gathered: &mut HashMap<Uuid, ReferenceKind>,
) {
    let categories = [
        (scene.terrain_textures(), ReferenceKind::Terrain),
        (scene.environment_assets(), ReferenceKind::Environment),
        (scene.parcel_environment_assets(), ReferenceKind::Parcel),
        (scene.object_assets(), ReferenceKind::Object),
        (scene.avatar_bake_textures(), ReferenceKind::Bake),
    ];
    for (uuids, kind) in categories {
        for uuid in uuids {
            if !uuid.is_nil() {
                gathered.entry(uuid).or_insert(kind);
            }
        }
    }
}

/// Optional plugin that enumerates built-in assets by a string argument.
///
/// IDs of loaded assets become a sticky allowlist exempt from cleanup until
/// the deletion command runs.
pub trait DefaultAssetLoader: Send + Sync {
    /// Enumerate the built-in assets selected by `what`.
    fn load(&self, what: &str) -> Vec<Asset>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct StubScene {
        region: Uuid,
        terrain: Vec<Uuid>,
        objects: Vec<Uuid>,
    }

    impl SceneView for StubScene {
        fn region_id(&self) -> Uuid {
            self.region
        }
        fn terrain_textures(&self) -> Vec<Uuid> {
            self.terrain.clone()
        }
        fn environment_assets(&self) -> Vec<Uuid> {
            vec![]
        }
        fn parcel_environment_assets(&self) -> Vec<Uuid> {
            vec![]
        }
        fn object_assets(&self) -> Vec<Uuid> {
            self.objects.clone()
        }
        fn avatar_bake_textures(&self) -> Vec<Uuid> {
            vec![Uuid::nil()]
        }
    }

    #[test]
    fn test_gather_unions_categories() {
        let shared = Uuid::new_v4();
        let scene = StubScene {
            region: Uuid::new_v4(),
            terrain: vec![shared, Uuid::new_v4()],
            objects: vec![shared, Uuid::new_v4()],
        };

        let mut gathered = HashMap::new();
        gather_scene_references(&scene, &mut gathered);

        // shared uuid counted once, nil bake uuid dropped
        assert_eq!(gathered.len(), 3);
        // first category wins the hint
        assert_eq!(gathered[&shared], ReferenceKind::Terrain);
    }

    #[test]
    fn test_reference_kind_display() {
        assert_eq!(ReferenceKind::Terrain.to_string(), "terrain");
        assert_eq!(ReferenceKind::Bake.to_string(), "bake");
    }
}
