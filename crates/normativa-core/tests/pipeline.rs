//! Ingest a small corpus from disk, reload the index and retrieve from it.

use std::path::Path;

use normativa_core::{
    assemble, HashingEmbedder, IndexBuilder, IndexPaths, MetadataStore, Retriever, SourceTable, VectorIndex,
};
use tempfile::TempDir;

const CALENDAR_TITLE: &str = "Calendario Académico 2025";

fn write_corpus(root: &Path) -> (std::path::PathBuf, SourceTable) {
    let docs = root.join("docs");
    std::fs::create_dir(&docs).unwrap();
    std::fs::write(docs.join("calendario_academico.txt"), "Plazo de matrícula: lunes 4 de agosto").unwrap();
    std::fs::write(docs.join("horario_biblioteca.txt"), "Horario de biblioteca: 8am-10pm").unwrap();
    let sources = SourceTable::parse(&format!(
        "[\"calendario_academico.txt\"]\ntitle = \"{CALENDAR_TITLE}\"\nvigencia = \"2025\"\n"
    ))
    .unwrap();
    (docs, sources)
}

fn ingest(docs: &Path, sources: &SourceTable, paths: &IndexPaths) -> usize {
    let embedder = HashingEmbedder::default();
    IndexBuilder::new(&embedder).run(docs, sources, paths).unwrap().rows
}

#[test]
fn question_retrieves_the_matching_document() {
    let dir = TempDir::new().unwrap();
    let (docs, sources) = write_corpus(dir.path());
    let paths = IndexPaths::new(dir.path().join("index"));
    assert_eq!(ingest(&docs, &sources, &paths), 2);

    let retriever = Retriever::load(&paths, Box::new(HashingEmbedder::default())).unwrap();
    let results = retriever.search("¿Cuándo es el plazo de matrícula?", 1).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].title, CALENDAR_TITLE);
    assert_eq!(results[0].text, "Plazo de matrícula: lunes 4 de agosto");

    let context = assemble(&results);
    assert_eq!(context.references, vec![CALENDAR_TITLE.to_string()]);
    assert_eq!(context.context_text, "Plazo de matrícula: lunes 4 de agosto");
}

#[test]
fn large_k_returns_every_row_best_first() {
    let dir = TempDir::new().unwrap();
    let (docs, sources) = write_corpus(dir.path());
    let paths = IndexPaths::new(dir.path().join("index"));
    ingest(&docs, &sources, &paths);

    let retriever = Retriever::load(&paths, Box::new(HashingEmbedder::default())).unwrap();
    let results = retriever.search("¿Cuándo es el plazo de matrícula?", 50).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].title, CALENDAR_TITLE);
    assert_eq!(results[1].title, "Horario Biblioteca");
    assert!(results[0].score >= results[1].score);
}

#[test]
fn reingesting_the_same_corpus_does_not_duplicate_rows() {
    let dir = TempDir::new().unwrap();
    let (docs, sources) = write_corpus(dir.path());
    let paths = IndexPaths::new(dir.path().join("index"));
    let first = ingest(&docs, &sources, &paths);
    let first_meta = MetadataStore::load(&paths.metadata()).unwrap();
    let first_index = VectorIndex::load(&paths.vector_index()).unwrap();

    let second = ingest(&docs, &sources, &paths);
    assert_eq!(first, second);
    let second_meta = MetadataStore::load(&paths.metadata()).unwrap();
    assert_eq!(second_meta, first_meta);
    let titles: Vec<&str> = second_meta.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec![CALENDAR_TITLE, "Horario Biblioteca"]);
    let second_index = VectorIndex::load(&paths.vector_index()).unwrap();
    assert_eq!(second_index.len(), first_index.len());
    for row in 0..second_index.len() {
        assert_eq!(second_index.row(row), first_index.row(row));
    }

    let retriever = Retriever::load(&paths, Box::new(HashingEmbedder::default())).unwrap();
    assert_eq!(retriever.len(), 2);
}

#[test]
fn querying_before_ingestion_reports_the_missing_index() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::new(dir.path().join("index"));
    let err = Retriever::load(&paths, Box::new(HashingEmbedder::default())).err().unwrap();
    assert!(err.to_string().contains("normativa ingest"));
}
