// Aggregates all former standalone integration tests as modules.
mod command_response;
mod pass_through;
mod supervisor;
