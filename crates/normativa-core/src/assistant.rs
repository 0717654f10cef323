//! Question answering: retrieve, assemble context, ask a provider.

use std::sync::Arc;

use serde::Serialize;
use tracing::error;

use crate::context::assemble;
use crate::prompt::{build_messages, NO_RESULTS_ANSWER};
use crate::providers::{ChatProvider, ProviderError};
use crate::retriever::{RetrieveError, Retriever};

/// Default number of chunks retrieved per question.
pub const DEFAULT_TOP_K: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub references: Vec<String>,
}

/// Answers questions with one retriever and one provider. Cheap to build per provider since
/// the retriever is shared.
pub struct Assistant {
    retriever: Arc<Retriever>,
    provider: Box<dyn ChatProvider>,
    k: usize,
}

impl Assistant {
    pub fn new(retriever: Arc<Retriever>, provider: Box<dyn ChatProvider>) -> Self {
        Self {
            retriever,
            provider,
            k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }

    pub fn ask(&self, question: &str) -> Result<Answer, AskError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AskError::EmptyQuestion);
        }
        let results = self.retriever.search(question, self.k).map_err(|e| {
            error!(error = %e, "retrieval failed");
            AskError::from(e)
        })?;
        if results.is_empty() {
            return Ok(Answer {
                answer: NO_RESULTS_ANSWER.to_string(),
                references: Vec::new(),
            });
        }
        let context = assemble(&results);
        let messages = build_messages(question, &context);
        let answer = self.provider.chat(&messages).map_err(|e| {
            error!(error = %e, "provider call failed");
            AskError::from(e)
        })?;
        Ok(Answer {
            answer,
            references: context.references,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("empty question")]
    EmptyQuestion,
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl AskError {
    /// Message safe to show to whoever asked. Internal detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            AskError::EmptyQuestion => "Falta la pregunta.",
            AskError::Retrieve(
                RetrieveError::MissingArtifact(_)
                | RetrieveError::Inconsistent { .. }
                | RetrieveError::Unpaired { .. },
            ) => {
                "El índice de normativa no está disponible. Ejecuta la ingesta de documentos."
            }
            AskError::Retrieve(_) => "No fue posible buscar en la normativa.",
            AskError::Provider(ProviderError::UnknownProvider(_)) => {
                "Proveedor no válido: usa chatgpt, deepseek u ollama."
            }
            AskError::Provider(ProviderError::MissingApiKey(_)) => {
                "El proveedor de lenguaje no está configurado."
            }
            AskError::Provider(_) => "El proveedor de lenguaje no respondió.",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::embed::{Embedder, HashingEmbedder};
    use crate::metadata::{MetadataRecord, MetadataStore};
    use crate::providers::ChatMessage;
    use crate::store::VectorIndex;

    /// Records the prompt and echoes a fixed answer.
    struct Scripted {
        reply: Result<String, ()>,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl ChatProvider for Scripted {
        fn chat(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            self.reply.clone().map_err(|_| ProviderError::EmptyResponse)
        }
    }

    fn scripted(reply: Result<&str, ()>) -> Box<Scripted> {
        Box::new(Scripted {
            reply: reply.map(str::to_string),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn retriever(items: &[(&str, &str)]) -> Arc<Retriever> {
        let embedder = HashingEmbedder::new(128);
        let mut index = VectorIndex::new();
        let mut metadata = MetadataStore::new();
        let texts: Vec<String> = items.iter().map(|(_, t)| t.to_string()).collect();
        index.add(&embedder.encode(&texts).unwrap()).unwrap();
        metadata.append(
            items
                .iter()
                .map(|(title, text)| MetadataRecord {
                    title: title.to_string(),
                    text: text.to_string(),
                    doc_id: String::new(),
                    chunk_id: 0,
                    url: String::new(),
                    validity: String::new(),
                })
                .collect(),
        );
        Arc::new(Retriever::new(Box::new(embedder), index, metadata).unwrap())
    }

    #[test]
    fn answers_with_deduplicated_references() {
        let r = retriever(&[
            ("Calendario", "Plazo de matrícula: lunes 4 de agosto"),
            ("Calendario", "Plazo de retracto: 15 de agosto"),
            ("Biblioteca", "Horario de biblioteca: 8am-10pm"),
        ]);
        let assistant = Assistant::new(r, scripted(Ok("Lunes 4 de agosto de 2025"))).with_top_k(3);
        let answer = assistant.ask("¿Cuándo es el plazo de matrícula?").unwrap();
        assert_eq!(answer.answer, "Lunes 4 de agosto de 2025");
        assert_eq!(answer.references, vec!["Calendario", "Biblioteca"]);
    }

    #[test]
    fn empty_index_answers_without_calling_the_provider() {
        let r = Arc::new(
            Retriever::new(Box::new(HashingEmbedder::new(8)), VectorIndex::new(), MetadataStore::new()).unwrap(),
        );
        let provider = scripted(Err(()));
        let assistant = Assistant::new(r, provider);
        let answer = assistant.ask("¿Horario?").unwrap();
        assert_eq!(answer.answer, NO_RESULTS_ANSWER);
        assert!(answer.references.is_empty());
    }

    #[test]
    fn provider_failures_map_to_a_public_message() {
        let r = retriever(&[("Calendario", "Plazo de matrícula")]);
        let err = Assistant::new(r, scripted(Err(()))).ask("plazo").unwrap_err();
        assert!(matches!(err, AskError::Provider(ProviderError::EmptyResponse)));
        assert_eq!(err.public_message(), "El proveedor de lenguaje no respondió.");
    }

    #[test]
    fn blank_question_is_rejected() {
        let r = retriever(&[("Calendario", "Plazo de matrícula")]);
        let err = Assistant::new(r, scripted(Ok("x"))).ask("   ").unwrap_err();
        assert_eq!(err.public_message(), "Falta la pregunta.");
    }

    #[test]
    fn missing_index_message_hides_paths() {
        let err = AskError::from(RetrieveError::MissingArtifact("/srv/index/index.vec".into()));
        assert!(!err.public_message().contains("/srv"));
    }
}
