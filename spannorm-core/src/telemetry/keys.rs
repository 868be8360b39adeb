/// Span attribute keys of the normalized LLM tracing schema.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const SPAN_KIND: &str = "openinference.span.kind";

pub const INPUT_VALUE: &str = "input.value";
pub const INPUT_MIME_TYPE: &str = "input.mime_type";
pub const OUTPUT_VALUE: &str = "output.value";
pub const OUTPUT_MIME_TYPE: &str = "output.mime_type";

pub const LLM_MODEL_NAME: &str = "llm.model_name";
pub const LLM_PROVIDER: &str = "llm.provider";
pub const LLM_SYSTEM: &str = "llm.system";
pub const LLM_INVOCATION_PARAMETERS: &str = "llm.invocation_parameters";
pub const LLM_PROMPTS: &str = "llm.prompts";
pub const LLM_PROMPT_TEMPLATE: &str = "llm.prompt_template.template";
pub const LLM_PROMPT_TEMPLATE_VARIABLES: &str = "llm.prompt_template.variables";
pub const LLM_INPUT_MESSAGES: &str = "llm.input_messages";
pub const LLM_OUTPUT_MESSAGES: &str = "llm.output_messages";
pub const LLM_TOOLS: &str = "llm.tools";
pub const LLM_FUNCTION_CALL: &str = "llm.function_call";

pub const LLM_TOKEN_COUNT_PROMPT: &str = "llm.token_count.prompt";
pub const LLM_TOKEN_COUNT_COMPLETION: &str = "llm.token_count.completion";
pub const LLM_TOKEN_COUNT_TOTAL: &str = "llm.token_count.total";
pub const LLM_TOKEN_COUNT_PROMPT_CACHE_READ: &str = "llm.token_count.prompt_details.cache_read";
pub const LLM_TOKEN_COUNT_PROMPT_CACHE_WRITE: &str = "llm.token_count.prompt_details.cache_write";
pub const LLM_TOKEN_COUNT_PROMPT_AUDIO: &str = "llm.token_count.prompt_details.audio";
pub const LLM_TOKEN_COUNT_COMPLETION_REASONING: &str = "llm.token_count.completion_details.reasoning";
pub const LLM_TOKEN_COUNT_COMPLETION_AUDIO: &str = "llm.token_count.completion_details.audio";

// Relative keys, nested under a message / content / tool-call prefix.
pub const MESSAGE_ROLE: &str = "message.role";
pub const MESSAGE_CONTENT: &str = "message.content";
pub const MESSAGE_CONTENTS: &str = "message.contents";
pub const MESSAGE_NAME: &str = "message.name";
pub const MESSAGE_TOOL_CALLS: &str = "message.tool_calls";
pub const MESSAGE_TOOL_CALL_ID: &str = "message.tool_call_id";
pub const MESSAGE_FUNCTION_CALL_NAME: &str = "message.function_call_name";
pub const MESSAGE_FUNCTION_CALL_ARGUMENTS_JSON: &str = "message.function_call_arguments_json";
pub const MESSAGE_CONTENT_TYPE: &str = "message_content.type";
pub const MESSAGE_CONTENT_TEXT: &str = "message_content.text";
pub const MESSAGE_CONTENT_IMAGE_URL: &str = "message_content.image.image.url";
pub const TOOL_CALL_ID: &str = "tool_call.id";
pub const TOOL_CALL_FUNCTION_NAME: &str = "tool_call.function.name";
pub const TOOL_CALL_FUNCTION_ARGUMENTS: &str = "tool_call.function.arguments";
pub const TOOL_JSON_SCHEMA: &str = "tool.json_schema";

pub const TOOL_NAME: &str = "tool.name";
pub const TOOL_DESCRIPTION: &str = "tool.description";
pub const TOOL_PARAMETERS: &str = "tool.parameters";

pub const RETRIEVAL_DOCUMENTS: &str = "retrieval.documents";
pub const DOCUMENT_ID: &str = "document.id";
pub const DOCUMENT_CONTENT: &str = "document.content";
pub const DOCUMENT_SCORE: &str = "document.score";
pub const DOCUMENT_METADATA: &str = "document.metadata";

pub const EMBEDDING_EMBEDDINGS: &str = "embedding.embeddings";
pub const EMBEDDING_TEXT: &str = "embedding.text";
pub const EMBEDDING_VECTOR: &str = "embedding.vector";
pub const EMBEDDING_MODEL_NAME: &str = "embedding.model_name";

pub const RERANKER_INPUT_DOCUMENTS: &str = "reranker.input_documents";
pub const RERANKER_OUTPUT_DOCUMENTS: &str = "reranker.output_documents";
pub const RERANKER_QUERY: &str = "reranker.query";
pub const RERANKER_MODEL_NAME: &str = "reranker.model_name";
pub const RERANKER_TOP_K: &str = "reranker.top_k";

pub const METADATA: &str = "metadata";
pub const SESSION_ID: &str = "session.id";

/// Exception event attributes
pub const EXCEPTION_TYPE: &str = "exception.type";
pub const EXCEPTION_MESSAGE: &str = "exception.message";
pub const EXCEPTION_ESCAPED: &str = "exception.escaped";
pub const EXCEPTION_STACKTRACE: &str = "exception.stacktrace";
pub const EXCEPTION_EVENT: &str = "exception";
pub const FIRST_TOKEN_EVENT: &str = "First Token Stream Event";

pub const MIME_JSON: &str = "application/json";
pub const MIME_TEXT: &str = "text/plain";
