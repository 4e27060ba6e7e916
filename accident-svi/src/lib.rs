pub mod fit;
pub mod initializer;
pub mod model_args;
pub mod models;
pub mod predictors;
pub mod training;

pub use fit::{fit_log_linear, fit_log_linear_random_init, FitResult};
pub use initializer::{
    candidate_seeds, evaluate_candidates, initialize, search_initialization, select_best_seed,
    InitSearchConfig, Initialized,
};
pub use model_args::ModelArgs;
pub use models::{
    BaseModel, LogLinearMixtureModel, LogLinearModel, ModelKind, NegBinomialLogLinearModel,
};
pub use predictors::PredictorTable;
pub use training::{
    run_svi, train_with_guide, train_with_random_init, LogReporter, ProgressReporter,
    TrainConfig, TrainResult, REPORT_EVERY,
};
