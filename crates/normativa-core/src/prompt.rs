//! Prompt for grounded answers. The model may only use the retrieved context and must
//! abstain with [NOT_FOUND_ANSWER] otherwise.

use crate::context::GroundedContext;
use crate::providers::ChatMessage;

/// Marker the model uses to abstain; also checked by evaluation.
pub const NOT_FOUND_ANSWER: &str = "No encontrado en normativa UFRO";

/// Answer returned without calling a provider when retrieval finds nothing.
pub const NO_RESULTS_ANSWER: &str =
    "No encontrado en normativa UFRO. Para esta consulta, te sugiero contactar con la unidad correspondiente.";

pub const SYSTEM_PROMPT: &str = "Eres un asistente que responde preguntas sobre la normativa \
universitaria de la UFRO. Respondes en español, de forma breve y precisa, usando únicamente los \
fragmentos de normativa que se te entregan. No inventes normas, fechas ni valores. Cita las \
referencias que se te indiquen al final de la respuesta.";

/// System and user messages for `question` grounded on `context`.
pub fn build_messages(question: &str, context: &GroundedContext) -> Vec<ChatMessage> {
    let user = format!(
        "Pregunta: {question}\n\n\
         Contexto de normativa (fragmentos relevantes):\n{context}\n\n\
         Instrucciones de respuesta:\n\
         - Responde SOLO en base al contexto anterior.\n\
         - Si hay varias fechas/valores, selecciona la que responda EXACTAMENTE a la pregunta.\n\
         - Sé explícito con la fecha/valor (formato: 'Lunes 4 de agosto de 2025', por ejemplo).\n\
         - Si la información no está en el contexto, responde: '{NOT_FOUND_ANSWER}'.\n\
         - Al final agrega:\n\
         Referencias:\n{references}",
        context = context.context_text,
        references = context.reference_block,
    );
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// Whether `answer` is the model abstaining.
pub fn is_abstention(answer: &str) -> bool {
    answer.to_lowercase().contains(&NOT_FOUND_ANSWER.to_lowercase())
}
