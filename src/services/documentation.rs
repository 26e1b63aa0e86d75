use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Trivia Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::game::create_game,
        crate::routes::game::get_game,
        crate::routes::game::join_game,
        crate::routes::game::mark_ready,
        crate::routes::game::leave_game,
        crate::routes::game::start_game,
        crate::routes::game::submit_answer,
        crate::routes::game::reset_game,
        crate::routes::question::generate_question,
        crate::routes::sse::game_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::game::CreateGameRequest,
            crate::dto::game::JoinGameRequest,
            crate::dto::game::HostActionRequest,
            crate::dto::game::SubmitAnswerRequest,
            crate::dto::game::JoinResponse,
            crate::dto::game::GameSummary,
            crate::dto::game::PlayerSummary,
            crate::dto::game::AnswerSummary,
            crate::dto::game::StandingSummary,
            crate::dto::phase::VisibleGamePhase,
            crate::dto::question::QuestionResponse,
            crate::dto::question::QuestionView,
            crate::dto::sse::Handshake,
            crate::dto::sse::PlayerJoinedEvent,
            crate::dto::sse::PlayerReadyEvent,
            crate::dto::sse::PlayerLeftEvent,
            crate::dto::sse::GameStartEvent,
            crate::dto::sse::QuestionStartedEvent,
            crate::dto::sse::AnswerScoredEvent,
            crate::dto::sse::GameOverEvent,
            crate::dto::sse::GameResetEvent,
            crate::dto::sse::FetchFailedEvent,
            crate::error::ErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "game", description = "Game session lifecycle"),
        (name = "questions", description = "Generated trivia questions"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
