//! Species Registry
//!
//! The registry is the ordered list of species names, index-aligned with the
//! classifier output vector. It is resolved once at startup and never changes.
//!
//! Resolution order:
//! 1. `labels.json` shipped inside the model artifact directory
//! 2. The sorted subdirectories of the training data directory
//! 3. The built-in [`FALLBACK_SPECIES`] list

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::loader::list_class_names;
use crate::utils::error::{Result, SpeciesError};

/// File name of the label mapping inside a model artifact directory
pub const LABELS_FILE_NAME: &str = "labels.json";

/// Current version of the label mapping format
pub const MAPPING_VERSION: u32 = 1;

/// Species used when neither a mapping artifact nor training data is available.
///
/// These are the páramo species the training images were collected for,
/// named the way the download step names their directories, in sorted order.
pub const FALLBACK_SPECIES: [&str; 111] = [
    "Acaena_elongata",
    "Ageratina_tinifolia",
    "Aglaeactis_cupripennis",
    "Agrostis_perennans",
    "Anas_andium",
    "Andigena_nigrirostris",
    "Andiperla_willinki",
    "Anisognathus_igniventris",
    "Arcytophyllum_muticum",
    "Astroblepus_grixalvii",
    "Atelopus_muisca",
    "Atlapetes_schistaceus",
    "Azorella_crenata",
    "Baccharis_tricuneata",
    "Bombus_rubicundus",
    "Calamagrostis_effusa",
    "Calceolaria_herbeohybrida",
    "Carex_bonplandii",
    "Castilleja_fissifolia",
    "Chaptalia_cordata",
    "Chibchanomys_orcesi",
    "Chusquea_tessellata",
    "Cinclodes_fuscus",
    "Cistothorus_apolinari",
    "Coeligena_helianthea",
    "Coendou_rufescens",
    "Coespeletia_timotensis",
    "Colias_dimera",
    "Conepatus_semistriatus",
    "Cryptotis_colombiana",
    "Cuniculus_taczanowskii",
    "Dendropsophus_labialis",
    "Diglossa_humeralis",
    "Dinomys_branickii",
    "Diplostephium_phylicoides",
    "Disterigma_empetrifolium",
    "Draba_litamo",
    "Elleanthus_aurantiacus",
    "Epidendrum_aggregatum",
    "Eriocnemis_vestita",
    "Espeletia_argentea",
    "Espeletia_grandiflora",
    "Espeletia_hartwegiana",
    "Espeletia_pycnophylla",
    "Espeletiopsis_corymbosa",
    "Falco_sparverius",
    "Festuca_dolichophylla",
    "Gaultheria_anastomosans",
    "Gentiana_sedifolia",
    "Gentianella_corymbosa",
    "Geranium_sibbaldioides",
    "Geranoaetus_melanoleucus",
    "Grallaria_quitensis",
    "Gunnera_magellanica",
    "Gynoxys_fuliginosa",
    "Halenia_weddelliana",
    "Huperzia_crassa",
    "Hypericum_laricifolium",
    "Isoetes_palmeri",
    "Jamesonia_bogotensis",
    "Lachemilla_orbiculata",
    "Lesbia_victoriae",
    "Libanothamnus_neriifolius",
    "Loricaria_complanata",
    "Lupinus_alopecuroides",
    "Lycalopex_culpaeus",
    "Lysipomia_sphagnophila",
    "Macleania_rupestris",
    "Masdevallia_coccinea",
    "Mazama_rufina",
    "Metallura_tyrianthina",
    "Muscisaxicola_alpinus",
    "Mustela_frenata",
    "Odocoileus_virginianus_goudotii",
    "Oreotrochilus_estella",
    "Ourisia_chamaedrifolia",
    "Oxalis_medicaginea",
    "Oxypogon_guerinii",
    "Penelope_montagnii",
    "Pentacalia_ledifolia",
    "Pernettya_prostrata",
    "Phalcoboenus_carunculatus",
    "Phrygilus_unicolor",
    "Plantago_rigida",
    "Polylepis_quadrijuga",
    "Pristimantis_bogotensis",
    "Pterophanes_cyanopterus",
    "Pudu_mephistophiles",
    "Puma_concolor",
    "Puya_goudotiana",
    "Puya_nivalis",
    "Puya_trianae",
    "Ranunculus_peruvianus",
    "Rhynchospora_paramora",
    "Riama_striata",
    "Scytalopus_spillmanni",
    "Senecio_niveoaureus",
    "Sphagnum_magellanicum",
    "Stenocercus_trachycephalus",
    "Sylvilagus_andinus",
    "Tapirus_pinchaque",
    "Thomasomys_niveipes",
    "Tipula",
    "Tremarctos_ornatus",
    "Trichomycterus_bogotensis",
    "Vaccinium_floribundum",
    "Valeriana_plantaginea",
    "Vanessa_virginiensis",
    "Vultur_gryphus",
    "Werneria_nubigena",
    "Zonotrichia_capensis",
];

/// Where the registry's names came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrySource {
    /// A versioned label mapping artifact
    Mapping,
    /// Subdirectory listing of a training data directory
    Directory,
    /// The built-in species list
    Fallback,
    /// Names supplied directly by the caller
    Provided,
}

impl fmt::Display for RegistrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrySource::Mapping => write!(f, "label mapping"),
            RegistrySource::Directory => write!(f, "training directory"),
            RegistrySource::Fallback => write!(f, "built-in list"),
            RegistrySource::Provided => write!(f, "provided names"),
        }
    }
}

/// On-disk label mapping (`labels.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    pub version: u32,
    /// Species names in class index order
    pub species: Vec<String>,
}

/// Ordered, immutable list of species names
#[derive(Debug, Clone)]
pub struct SpeciesRegistry {
    names: Vec<String>,
    source: RegistrySource,
}

impl SpeciesRegistry {
    fn with_source(names: Vec<String>, source: RegistrySource) -> Result<Self> {
        if names.is_empty() {
            return Err(SpeciesError::Registry(format!(
                "no species names found ({})",
                source
            )));
        }

        let mut sorted: Vec<&String> = names.iter().collect();
        sorted.sort();
        if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(SpeciesError::Registry(format!(
                "duplicate species name '{}'",
                pair[0]
            )));
        }

        Ok(Self { names, source })
    }

    /// Build a registry from names already in class index order
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_source(
            names.into_iter().map(Into::into).collect(),
            RegistrySource::Provided,
        )
    }

    /// Build a registry from the sorted subdirectory names of `dir`
    pub fn from_directory(dir: &Path) -> Result<Self> {
        Self::with_source(list_class_names(dir)?, RegistrySource::Directory)
    }

    /// Load a registry from a label mapping file
    pub fn from_mapping_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            SpeciesError::Registry(format!("Failed to read label mapping {:?}: {}", path, e))
        })?;
        let mapping: LabelMapping = serde_json::from_str(&json)?;

        if mapping.version != MAPPING_VERSION {
            return Err(SpeciesError::Registry(format!(
                "unsupported label mapping version {} in {:?} (expected {})",
                mapping.version, path, MAPPING_VERSION
            )));
        }

        Self::with_source(mapping.species, RegistrySource::Mapping)
    }

    /// The built-in species list
    pub fn fallback() -> Self {
        Self {
            names: FALLBACK_SPECIES.iter().map(|s| s.to_string()).collect(),
            source: RegistrySource::Fallback,
        }
    }

    /// Resolve the registry from the first usable source
    ///
    /// Never fails: unusable sources are logged and skipped, ending at the
    /// built-in list.
    pub fn resolve(model_dir: Option<&Path>, train_dir: Option<&Path>) -> Self {
        if let Some(model_dir) = model_dir {
            let mapping_path = model_dir.join(LABELS_FILE_NAME);
            if mapping_path.exists() {
                match Self::from_mapping_file(&mapping_path) {
                    Ok(registry) => {
                        info!(
                            "Loaded {} species from {:?}",
                            registry.len(),
                            mapping_path
                        );
                        return registry;
                    }
                    Err(e) => warn!("Ignoring label mapping {:?}: {}", mapping_path, e),
                }
            }
        }

        if let Some(train_dir) = train_dir {
            if train_dir.is_dir() {
                match Self::from_directory(train_dir) {
                    Ok(registry) => {
                        info!("Loaded {} species from {:?}", registry.len(), train_dir);
                        return registry;
                    }
                    Err(e) => warn!("Ignoring training directory {:?}: {}", train_dir, e),
                }
            } else {
                warn!("Training directory {:?} not found", train_dir);
            }
        }

        let registry = Self::fallback();
        warn!("Using built-in list of {} species", registry.len());
        registry
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Species name for a class index
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Class index for a species name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn source(&self) -> RegistrySource {
        self.source
    }

    /// Check the registry against the classifier output dimension, logging a mismatch
    pub fn matches_output_dimension(&self, dimension: usize) -> bool {
        if self.len() == dimension {
            return true;
        }
        warn!(
            "Species registry has {} names but the classifier outputs {} classes; \
             predictions past index {} will fail",
            self.len(),
            dimension,
            self.len().saturating_sub(1)
        );
        false
    }

    pub fn to_mapping(&self) -> LabelMapping {
        LabelMapping {
            version: MAPPING_VERSION,
            species: self.names.clone(),
        }
    }

    /// Write the registry as a label mapping file
    pub fn write_mapping(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.to_mapping())?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_train_dir(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        dir
    }

    #[test]
    fn test_fallback_is_sorted_and_unique() {
        let registry = SpeciesRegistry::fallback();
        let mut sorted = registry.names().to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, registry.names());
        assert_eq!(registry.source(), RegistrySource::Fallback);
    }

    #[test]
    fn test_from_directory_uses_alphabetical_order() {
        let dir = make_train_dir(&["Vultur_gryphus", "Anas_andium", "Puma_concolor"]);
        let registry = SpeciesRegistry::from_directory(dir.path()).unwrap();

        assert_eq!(registry.name(0), Some("Anas_andium"));
        assert_eq!(registry.name(2), Some("Vultur_gryphus"));
        assert_eq!(registry.name(3), None);
        assert_eq!(registry.index_of("Puma_concolor"), Some(1));
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = make_train_dir(&[]);
        assert!(SpeciesRegistry::from_directory(dir.path()).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        assert!(SpeciesRegistry::from_names(["a", "b", "a"]).is_err());
    }

    #[test]
    fn test_mapping_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model").join(LABELS_FILE_NAME);

        let registry = SpeciesRegistry::from_names(["Puya_nivalis", "Draba_litamo"]).unwrap();
        registry.write_mapping(&path).unwrap();

        let loaded = SpeciesRegistry::from_mapping_file(&path).unwrap();
        assert_eq!(loaded.names(), registry.names());
        assert_eq!(loaded.source(), RegistrySource::Mapping);
    }

    #[test]
    fn test_mapping_version_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LABELS_FILE_NAME);
        fs::write(&path, r#"{"version": 2, "species": ["a"]}"#).unwrap();

        let err = SpeciesRegistry::from_mapping_file(&path).unwrap_err();
        assert!(err.to_string().contains("version 2"));
    }

    #[test]
    fn test_missing_mapping_file_is_registry_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpeciesRegistry::from_mapping_file(&dir.path().join(LABELS_FILE_NAME)).unwrap_err();
        assert!(matches!(err, SpeciesError::Registry(_)));
        assert!(err.to_string().contains("Failed to read label mapping"));
    }

    #[test]
    fn test_resolve_prefers_mapping() {
        let model_dir = tempfile::tempdir().unwrap();
        SpeciesRegistry::from_names(["Tipula"])
            .unwrap()
            .write_mapping(&model_dir.path().join(LABELS_FILE_NAME))
            .unwrap();
        let train_dir = make_train_dir(&["Anas_andium", "Puma_concolor"]);

        let registry = SpeciesRegistry::resolve(Some(model_dir.path()), Some(train_dir.path()));
        assert_eq!(registry.names(), ["Tipula".to_string()]);
    }

    #[test]
    fn test_resolve_falls_back_to_directory_then_builtin() {
        let model_dir = tempfile::tempdir().unwrap();
        let train_dir = make_train_dir(&["Anas_andium", "Puma_concolor"]);

        let registry = SpeciesRegistry::resolve(Some(model_dir.path()), Some(train_dir.path()));
        assert_eq!(registry.source(), RegistrySource::Directory);
        assert_eq!(registry.len(), 2);

        let missing = train_dir.path().join("missing");
        let registry = SpeciesRegistry::resolve(None, Some(&missing));
        assert_eq!(registry.source(), RegistrySource::Fallback);
        assert_eq!(registry.len(), FALLBACK_SPECIES.len());
    }

    #[test]
    fn test_matches_output_dimension() {
        let registry = SpeciesRegistry::from_names(["a", "b"]).unwrap();
        assert!(registry.matches_output_dimension(2));
        assert!(!registry.matches_output_dimension(3));
    }
}
