//! Taxonomic name utilities.
//!
//! This module maps reported taxon names onto the coarse ranks the clinical
//! summary works with: genus (derived from the binomial) and phylum (looked up
//! in a curated table). Phylum names follow current nomenclature
//! (`Bacillota`, `Pseudomonadota`, ...); legacy names seen in older reference
//! databases are normalised on the way in.
//!
//! Lookups are exact and case-sensitive. There is no fuzzy matching, so a
//! misspelt or novel genus maps to `"Unknown"`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Placeholder used for any rank that cannot be resolved.
pub const UNKNOWN: &str = "Unknown";

/// Taxonomic classification levels, as encoded in classifier report rank codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaxonomicLevel {
    Unclassified,
    Root,
    Domain,
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    /// Ranks the report does not name (`-`, `no rank`) or sub-ranks such as `S1`.
    Other,
}

impl TaxonomicLevel {
    /// Parses a report rank code.
    ///
    /// Accepts single-letter Kraken2 codes (`U`, `R`, `D`, `K`, `P`, `C`, `O`,
    /// `F`, `G`, `S`) and the spelled-out ranks used by KrakenUniq reports.
    /// Numbered sub-ranks (`S1`, `G2`, `R1`) are reported as [`TaxonomicLevel::Other`].
    pub fn from_rank_code(code: &str) -> Self {
        match code.trim() {
            "U" | "unclassified" => TaxonomicLevel::Unclassified,
            "R" | "root" => TaxonomicLevel::Root,
            "D" | "superkingdom" | "domain" => TaxonomicLevel::Domain,
            "K" | "kingdom" => TaxonomicLevel::Kingdom,
            "P" | "phylum" => TaxonomicLevel::Phylum,
            "C" | "class" => TaxonomicLevel::Class,
            "O" | "order" => TaxonomicLevel::Order,
            "F" | "family" => TaxonomicLevel::Family,
            "G" | "genus" => TaxonomicLevel::Genus,
            "S" | "species" => TaxonomicLevel::Species,
            _ => TaxonomicLevel::Other,
        }
    }

    /// Returns a string representation of the taxonomic level.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonomicLevel::Unclassified => "unclassified",
            TaxonomicLevel::Root => "root",
            TaxonomicLevel::Domain => "domain",
            TaxonomicLevel::Kingdom => "kingdom",
            TaxonomicLevel::Phylum => "phylum",
            TaxonomicLevel::Class => "class",
            TaxonomicLevel::Order => "order",
            TaxonomicLevel::Family => "family",
            TaxonomicLevel::Genus => "genus",
            TaxonomicLevel::Species => "species",
            TaxonomicLevel::Other => "other",
        }
    }
}

/// Legacy phylum names and their current equivalents.
const PHYLUM_SYNONYMS: &[(&str, &str)] = &[
    ("Firmicutes", "Bacillota"),
    ("Bacteroidetes", "Bacteroidota"),
    ("Proteobacteria", "Pseudomonadota"),
    ("Actinobacteria", "Actinomycetota"),
    ("Verrucomicrobia", "Verrucomicrobiota"),
    ("Fusobacteria", "Fusobacteriota"),
    ("Tenericutes", "Mycoplasmatota"),
    ("Spirochaetes", "Spirochaetota"),
    ("Euryarchaeota", "Methanobacteriota"),
    ("Chlamydiae", "Chlamydiota"),
    ("Synergistetes", "Synergistota"),
    ("Lentisphaerae", "Lentisphaerota"),
    ("Thermodesulfobacteria", "Desulfobacterota"),
];

/// Phylum to domain, for tables that do not report a kingdom.
const PHYLUM_KINGDOMS: &[(&str, &str)] = &[
    ("Bacillota", "Bacteria"),
    ("Bacteroidota", "Bacteria"),
    ("Pseudomonadota", "Bacteria"),
    ("Actinomycetota", "Bacteria"),
    ("Verrucomicrobiota", "Bacteria"),
    ("Fusobacteriota", "Bacteria"),
    ("Mycoplasmatota", "Bacteria"),
    ("Spirochaetota", "Bacteria"),
    ("Campylobacterota", "Bacteria"),
    ("Chlamydiota", "Bacteria"),
    ("Desulfobacterota", "Bacteria"),
    ("Synergistota", "Bacteria"),
    ("Lentisphaerota", "Bacteria"),
    ("Methanobacteriota", "Archaea"),
    ("Apicomplexa", "Eukaryota"),
    ("Metamonada", "Eukaryota"),
    ("Evosea", "Eukaryota"),
    ("Bigyra", "Eukaryota"),
    ("Euglenozoa", "Eukaryota"),
    ("Ciliophora", "Eukaryota"),
    ("Microsporidia", "Eukaryota"),
    ("Ascomycota", "Eukaryota"),
    ("Basidiomycota", "Eukaryota"),
    ("Nematoda", "Eukaryota"),
    ("Platyhelminthes", "Eukaryota"),
    ("Chordata", "Eukaryota"),
    ("Streptophyta", "Eukaryota"),
    ("Chlorophyta", "Eukaryota"),
];

/// Names that need a species-level entry because the genus token alone is
/// misleading (bracketed reclassifications) or absent from the genus table.
const SPECIES_PHYLA: &[(&str, &str)] = &[
    ("[Clostridium] innocuum", "Bacillota"),
    ("[Clostridium] scindens", "Bacillota"),
    ("[Clostridium] symbiosum", "Bacillota"),
    ("[Ruminococcus] gnavus", "Bacillota"),
    ("[Ruminococcus] torques", "Bacillota"),
    ("[Eubacterium] rectale", "Bacillota"),
    ("[Eubacterium] hallii", "Bacillota"),
    ("Homo sapiens", "Chordata"),
    ("Blastocystis hominis", "Bigyra"),
];

const GENUS_PHYLA: &[(&str, &str)] = &[
    // Bacillota
    ("Staphylococcus", "Bacillota"),
    ("Streptococcus", "Bacillota"),
    ("Enterococcus", "Bacillota"),
    ("Clostridium", "Bacillota"),
    ("Clostridioides", "Bacillota"),
    ("Lactobacillus", "Bacillota"),
    ("Limosilactobacillus", "Bacillota"),
    ("Lacticaseibacillus", "Bacillota"),
    ("Lactococcus", "Bacillota"),
    ("Bacillus", "Bacillota"),
    ("Listeria", "Bacillota"),
    ("Faecalibacterium", "Bacillota"),
    ("Ruminococcus", "Bacillota"),
    ("Roseburia", "Bacillota"),
    ("Blautia", "Bacillota"),
    ("Veillonella", "Bacillota"),
    ("Dialister", "Bacillota"),
    ("Eubacterium", "Bacillota"),
    ("Lachnospira", "Bacillota"),
    ("Coprococcus", "Bacillota"),
    ("Dorea", "Bacillota"),
    ("Megamonas", "Bacillota"),
    ("Anaerostipes", "Bacillota"),
    ("Agathobacter", "Bacillota"),
    ("Subdoligranulum", "Bacillota"),
    ("Peptostreptococcus", "Bacillota"),
    ("Finegoldia", "Bacillota"),
    ("Erysipelatoclostridium", "Bacillota"),
    ("Gemella", "Bacillota"),
    // Bacteroidota
    ("Bacteroides", "Bacteroidota"),
    ("Phocaeicola", "Bacteroidota"),
    ("Prevotella", "Bacteroidota"),
    ("Segatella", "Bacteroidota"),
    ("Porphyromonas", "Bacteroidota"),
    ("Parabacteroides", "Bacteroidota"),
    ("Alistipes", "Bacteroidota"),
    ("Odoribacter", "Bacteroidota"),
    ("Tannerella", "Bacteroidota"),
    ("Capnocytophaga", "Bacteroidota"),
    // Pseudomonadota
    ("Escherichia", "Pseudomonadota"),
    ("Klebsiella", "Pseudomonadota"),
    ("Salmonella", "Pseudomonadota"),
    ("Shigella", "Pseudomonadota"),
    ("Enterobacter", "Pseudomonadota"),
    ("Citrobacter", "Pseudomonadota"),
    ("Proteus", "Pseudomonadota"),
    ("Morganella", "Pseudomonadota"),
    ("Serratia", "Pseudomonadota"),
    ("Yersinia", "Pseudomonadota"),
    ("Vibrio", "Pseudomonadota"),
    ("Pseudomonas", "Pseudomonadota"),
    ("Acinetobacter", "Pseudomonadota"),
    ("Haemophilus", "Pseudomonadota"),
    ("Neisseria", "Pseudomonadota"),
    ("Sutterella", "Pseudomonadota"),
    ("Ralstonia", "Pseudomonadota"),
    // Campylobacterota
    ("Campylobacter", "Campylobacterota"),
    ("Helicobacter", "Campylobacterota"),
    // Actinomycetota
    ("Bifidobacterium", "Actinomycetota"),
    ("Collinsella", "Actinomycetota"),
    ("Eggerthella", "Actinomycetota"),
    ("Corynebacterium", "Actinomycetota"),
    ("Cutibacterium", "Actinomycetota"),
    ("Mycobacterium", "Actinomycetota"),
    ("Actinomyces", "Actinomycetota"),
    ("Gardnerella", "Actinomycetota"),
    ("Rothia", "Actinomycetota"),
    // Smaller bacterial phyla
    ("Akkermansia", "Verrucomicrobiota"),
    ("Fusobacterium", "Fusobacteriota"),
    ("Treponema", "Spirochaetota"),
    ("Borrelia", "Spirochaetota"),
    ("Leptospira", "Spirochaetota"),
    ("Brachyspira", "Spirochaetota"),
    ("Mycoplasma", "Mycoplasmatota"),
    ("Ureaplasma", "Mycoplasmatota"),
    ("Chlamydia", "Chlamydiota"),
    ("Desulfovibrio", "Desulfobacterota"),
    ("Bilophila", "Desulfobacterota"),
    // Archaea
    ("Methanobrevibacter", "Methanobacteriota"),
    ("Methanosphaera", "Methanobacteriota"),
    // Protozoa
    ("Giardia", "Metamonada"),
    ("Trichomonas", "Metamonada"),
    ("Dientamoeba", "Metamonada"),
    ("Entamoeba", "Evosea"),
    ("Cryptosporidium", "Apicomplexa"),
    ("Cyclospora", "Apicomplexa"),
    ("Toxoplasma", "Apicomplexa"),
    ("Plasmodium", "Apicomplexa"),
    ("Cystoisospora", "Apicomplexa"),
    ("Blastocystis", "Bigyra"),
    ("Balantioides", "Ciliophora"),
    ("Leishmania", "Euglenozoa"),
    ("Trypanosoma", "Euglenozoa"),
    ("Enterocytozoon", "Microsporidia"),
    ("Encephalitozoon", "Microsporidia"),
    // Fungi
    ("Candida", "Ascomycota"),
    ("Saccharomyces", "Ascomycota"),
    ("Aspergillus", "Ascomycota"),
    ("Cryptococcus", "Basidiomycota"),
    ("Malassezia", "Basidiomycota"),
    // Helminths
    ("Ascaris", "Nematoda"),
    ("Enterobius", "Nematoda"),
    ("Trichuris", "Nematoda"),
    ("Strongyloides", "Nematoda"),
    ("Ancylostoma", "Nematoda"),
    ("Necator", "Nematoda"),
    ("Taenia", "Platyhelminthes"),
    ("Hymenolepis", "Platyhelminthes"),
    ("Echinococcus", "Platyhelminthes"),
    ("Schistosoma", "Platyhelminthes"),
    ("Fasciola", "Platyhelminthes"),
    // Host
    ("Homo", "Chordata"),
];

static DEFAULT_MAPPER: LazyLock<TaxonomyMapper> = LazyLock::new(TaxonomyMapper::new);

/// Curated species/genus to phylum lookup.
#[derive(Debug, Clone)]
pub struct TaxonomyMapper {
    species_phyla: HashMap<String, String>,
    genus_phyla: HashMap<String, String>,
}

impl TaxonomyMapper {
    /// Creates a mapper loaded with the built-in curated table.
    pub fn new() -> Self {
        let to_map = |entries: &[(&str, &str)]| {
            entries
                .iter()
                .map(|(name, phylum)| (name.to_string(), phylum.to_string()))
                .collect::<HashMap<_, _>>()
        };
        TaxonomyMapper {
            species_phyla: to_map(SPECIES_PHYLA),
            genus_phyla: to_map(GENUS_PHYLA),
        }
    }

    /// Adds extra entries on top of the curated table.
    ///
    /// Keys containing whitespace are treated as species names, anything else
    /// as a genus. Phylum values are normalised to current nomenclature.
    pub fn with_entries(mut self, entries: &BTreeMap<String, String>) -> Self {
        for (name, phylum) in entries {
            let phylum = normalize_phylum(phylum);
            if name.split_whitespace().count() > 1 {
                self.species_phyla.insert(name.trim().to_string(), phylum);
            } else {
                self.genus_phyla.insert(name.trim().to_string(), phylum);
            }
        }
        self
    }

    /// Returns the phylum for a species or genus name, if curated.
    ///
    /// The full name is tried as a species first, then its genus.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        if let Some(phylum) = self.species_phyla.get(name) {
            return Some(phylum.as_str());
        }
        let genus = extract_genus(name);
        self.genus_phyla.get(&genus).map(String::as_str)
    }

    /// Maps a species or genus name to its phylum, `"Unknown"` on a miss.
    pub fn map_to_phylum(&self, name: &str) -> String {
        self.lookup(name).unwrap_or(UNKNOWN).to_string()
    }
}

impl Default for TaxonomyMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the genus from a binomial name.
///
/// Takes the first whitespace-delimited token, dropping bracketed
/// qualifiers (`"[Clostridium] innocuum"` gives `"Clostridium"`) and a
/// leading `Candidatus`. Empty or malformed input gives `"Unknown"`.
pub fn extract_genus(species: &str) -> String {
    let mut tokens = species.split_whitespace();
    let mut first = tokens.next();
    if first == Some("Candidatus") {
        first = tokens.next();
    }

    let token = match first {
        Some(token) => token.trim_matches(|c| c == '[' || c == ']' || c == '\'' || c == '"'),
        None => return UNKNOWN.to_string(),
    };

    let well_formed = token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
        && token.chars().all(|c| c.is_ascii_alphabetic() || c == '-');

    if well_formed {
        token.to_string()
    } else {
        UNKNOWN.to_string()
    }
}

/// Maps a species or genus name to its phylum using the built-in table.
pub fn map_to_phylum(name: &str) -> String {
    DEFAULT_MAPPER.map_to_phylum(name)
}

/// Rewrites legacy phylum names to current nomenclature.
pub fn normalize_phylum(name: &str) -> String {
    let name = name.trim();
    PHYLUM_SYNONYMS
        .iter()
        .find(|(legacy, _)| *legacy == name)
        .map(|(_, modern)| modern.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Infers the top-level domain of a (normalised) phylum.
pub fn infer_kingdom(phylum: &str) -> &'static str {
    PHYLUM_KINGDOMS
        .iter()
        .find(|(p, _)| *p == phylum)
        .map(|(_, kingdom)| *kingdom)
        .unwrap_or(UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_codes() {
        assert_eq!(TaxonomicLevel::from_rank_code("S"), TaxonomicLevel::Species);
        assert_eq!(TaxonomicLevel::from_rank_code("species"), TaxonomicLevel::Species);
        assert_eq!(TaxonomicLevel::from_rank_code("S1"), TaxonomicLevel::Other);
        assert_eq!(TaxonomicLevel::from_rank_code("R1"), TaxonomicLevel::Other);
        assert_eq!(TaxonomicLevel::from_rank_code("D"), TaxonomicLevel::Domain);
        assert_eq!(TaxonomicLevel::from_rank_code(" U "), TaxonomicLevel::Unclassified);
        assert_eq!(TaxonomicLevel::from_rank_code("no rank"), TaxonomicLevel::Other);
        assert_eq!(TaxonomicLevel::Genus.as_str(), "genus");
    }

    #[test]
    fn test_extract_genus() {
        assert_eq!(extract_genus("Escherichia coli"), "Escherichia");
        assert_eq!(extract_genus("[Clostridium] innocuum"), "Clostridium");
        assert_eq!(extract_genus("  Bacteroides   fragilis "), "Bacteroides");
        assert_eq!(extract_genus("Candidatus Methanomethylophilus alvi"), "Methanomethylophilus");
        assert_eq!(extract_genus("Akkermansia"), "Akkermansia");
    }

    #[test]
    fn test_extract_genus_malformed() {
        assert_eq!(extract_genus(""), UNKNOWN);
        assert_eq!(extract_genus("   "), UNKNOWN);
        assert_eq!(extract_genus("[]"), UNKNOWN);
        assert_eq!(extract_genus("uncultured bacterium"), UNKNOWN);
        assert_eq!(extract_genus("12345"), UNKNOWN);
    }

    #[test]
    fn test_map_to_phylum() {
        assert_eq!(map_to_phylum("Escherichia coli"), "Pseudomonadota");
        assert_eq!(map_to_phylum("Faecalibacterium prausnitzii"), "Bacillota");
        assert_eq!(map_to_phylum("[Ruminococcus] gnavus"), "Bacillota");
        assert_eq!(map_to_phylum("Bacteroides"), "Bacteroidota");
        assert_eq!(map_to_phylum("Giardia intestinalis"), "Metamonada");
        assert_eq!(map_to_phylum("Homo sapiens"), "Chordata");
    }

    #[test]
    fn test_map_to_phylum_is_exact() {
        assert_eq!(map_to_phylum("escherichia coli"), UNKNOWN);
        assert_eq!(map_to_phylum("Escherichiaa coli"), UNKNOWN);
        assert_eq!(map_to_phylum(""), UNKNOWN);
    }

    #[test]
    fn test_with_entries() {
        let mut extra = BTreeMap::new();
        extra.insert("Oxalobacter".to_string(), "Proteobacteria".to_string());
        extra.insert("Weird organism".to_string(), "Firmicutes".to_string());
        let mapper = TaxonomyMapper::new().with_entries(&extra);

        assert_eq!(mapper.map_to_phylum("Oxalobacter formigenes"), "Pseudomonadota");
        assert_eq!(mapper.map_to_phylum("Weird organism"), "Bacillota");
        assert_eq!(mapper.map_to_phylum("Weird other"), UNKNOWN);
    }

    #[test]
    fn test_normalize_and_kingdom() {
        assert_eq!(normalize_phylum("Firmicutes"), "Bacillota");
        assert_eq!(normalize_phylum("Bacillota"), "Bacillota");
        assert_eq!(infer_kingdom("Bacillota"), "Bacteria");
        assert_eq!(infer_kingdom("Methanobacteriota"), "Archaea");
        assert_eq!(infer_kingdom("Apicomplexa"), "Eukaryota");
        assert_eq!(infer_kingdom(UNKNOWN), UNKNOWN);
    }

    #[test]
    fn test_curated_phyla_have_kingdoms() {
        for (_, phylum) in GENUS_PHYLA.iter().chain(SPECIES_PHYLA.iter()) {
            assert_ne!(infer_kingdom(phylum), UNKNOWN, "no kingdom for {}", phylum);
        }
    }
}
