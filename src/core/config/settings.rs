use super::parsing::{
    env_optional, env_or_default, is_supported_document_extension, parse_bool,
    parse_cors_origins, parse_environment, parse_f64, parse_string_list, parse_u32, parse_u64,
    parse_usize, DEFAULT_DOCUMENT_EXTENSIONS,
};
use super::types::{
    AiSettings, ApiSettings, ConfigError, CorsSettings, DatalabSettings, EvaluationSettings,
    RuntimeSettings, S3Settings, ServerHost, ServerPort, ServerSettings, Settings,
    StorageSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("TEACHTECH_HOST", "0.0.0.0");
        let port = env_or_default("TEACHTECH_PORT", "8000");

        let environment = parse_environment(
            env_optional("TEACHTECH_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("TEACHTECH_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "TeachTech Grader API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let ai_api_key = env_optional("AI_API_KEY")
            .or_else(|| env_optional("GEMINI_API_KEY"))
            .unwrap_or_default();
        let ai_base_url = env_or_default(
            "AI_BASE_URL",
            "https://generativelanguage.googleapis.com/v1beta/openai",
        );
        let ai_model = env_or_default("AI_MODEL", "gemini-1.5-flash");
        let ai_max_tokens = parse_u32("AI_MAX_TOKENS", env_or_default("AI_MAX_TOKENS", "2048"))?;
        let ai_temperature =
            parse_f64("AI_TEMPERATURE", env_or_default("AI_TEMPERATURE", "0.2"))?;
        let ai_request_timeout =
            parse_u64("AI_REQUEST_TIMEOUT", env_or_default("AI_REQUEST_TIMEOUT", "60"))?;
        let ai_max_retries = parse_u32("AI_MAX_RETRIES", env_or_default("AI_MAX_RETRIES", "0"))?;

        let datalab_api_key = env_or_default("DATALAB_API_KEY", "");
        let datalab_base_url = env_or_default("DATALAB_BASE_URL", "https://www.datalab.to/api/v1");
        let datalab_mode = env_or_default("DATALAB_MODE", "accurate").to_ascii_lowercase();
        let datalab_output_format =
            env_or_default("DATALAB_OUTPUT_FORMAT", "markdown").to_ascii_lowercase();
        let datalab_timeout_seconds =
            parse_u64("DATALAB_TIMEOUT_SECONDS", env_or_default("DATALAB_TIMEOUT_SECONDS", "60"))?;
        let datalab_poll_interval_seconds = parse_u64(
            "DATALAB_POLL_INTERVAL_SECONDS",
            env_or_default("DATALAB_POLL_INTERVAL_SECONDS", "2"),
        )?;
        let datalab_max_poll_attempts = parse_u32(
            "DATALAB_MAX_POLL_ATTEMPTS",
            env_or_default("DATALAB_MAX_POLL_ATTEMPTS", "25"),
        )?;
        let datalab_max_submit_retries = parse_u32(
            "DATALAB_MAX_SUBMIT_RETRIES",
            env_or_default("DATALAB_MAX_SUBMIT_RETRIES", "2"),
        )?;

        let max_upload_size_mb =
            parse_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "10"))?;
        let allowed_document_extensions = parse_string_list(
            env_optional("ALLOWED_DOCUMENT_EXTENSIONS"),
            DEFAULT_DOCUMENT_EXTENSIONS,
        );
        let max_images_per_evaluation = parse_u64(
            "MAX_IMAGES_PER_EVALUATION",
            env_or_default("MAX_IMAGES_PER_EVALUATION", "10"),
        )?;
        let presigned_url_expire_minutes = parse_u64(
            "PRESIGNED_URL_EXPIRE_MINUTES",
            env_or_default("PRESIGNED_URL_EXPIRE_MINUTES", "15"),
        )?;

        let s3_endpoint = env_or_default("S3_ENDPOINT", "https://s3.amazonaws.com");
        let s3_access_key = env_optional("S3_ACCESS_KEY")
            .or_else(|| env_optional("AWS_ACCESS_KEY_ID"))
            .unwrap_or_default();
        let s3_secret_key = env_optional("S3_SECRET_KEY")
            .or_else(|| env_optional("AWS_SECRET_ACCESS_KEY"))
            .unwrap_or_default();
        let s3_bucket = env_optional("S3_BUCKET")
            .or_else(|| env_optional("AWS_S3_BUCKET_NAME"))
            .unwrap_or_else(|| "teachtech-documents".to_string());
        let s3_region = env_optional("S3_REGION")
            .or_else(|| env_optional("AWS_REGION"))
            .unwrap_or_else(|| "us-east-1".to_string());

        let evaluation_timeout_seconds = parse_u64(
            "EVALUATION_TIMEOUT_SECONDS",
            env_or_default("EVALUATION_TIMEOUT_SECONDS", "60"),
        )?;
        let strict_oracle_validation = env_optional("ORACLE_STRICT_VALIDATION")
            .map(|value| parse_bool(&value))
            .unwrap_or(true);
        let max_criteria =
            parse_usize("MAX_EVALUATION_CRITERIA", env_or_default("MAX_EVALUATION_CRITERIA", "5"))?;

        let log_level = env_or_default("TEACHTECH_LOG_LEVEL", "info");
        let json = env_optional("TEACHTECH_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            ai: AiSettings {
                api_key: ai_api_key,
                base_url: ai_base_url,
                model: ai_model,
                max_tokens: ai_max_tokens,
                temperature: ai_temperature,
                request_timeout: ai_request_timeout,
                max_retries: ai_max_retries,
            },
            datalab: DatalabSettings {
                api_key: datalab_api_key,
                base_url: datalab_base_url,
                mode: datalab_mode,
                output_format: datalab_output_format,
                timeout_seconds: datalab_timeout_seconds,
                poll_interval_seconds: datalab_poll_interval_seconds,
                max_poll_attempts: datalab_max_poll_attempts,
                max_submit_retries: datalab_max_submit_retries,
            },
            storage: StorageSettings {
                max_upload_size_mb,
                allowed_document_extensions,
                max_images_per_evaluation,
                presigned_url_expire_minutes,
            },
            s3: S3Settings {
                endpoint: s3_endpoint,
                access_key: s3_access_key,
                secret_key: s3_secret_key,
                bucket: s3_bucket,
                region: s3_region,
            },
            evaluation: EvaluationSettings {
                request_timeout_seconds: evaluation_timeout_seconds,
                strict_oracle_validation,
                max_criteria,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn datalab(&self) -> &DatalabSettings {
        &self.datalab
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub(crate) fn evaluation(&self) -> &EvaluationSettings {
        &self.evaluation
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.allowed_document_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ALLOWED_DOCUMENT_EXTENSIONS",
                value: String::from("<empty>"),
            });
        }
        for extension in &self.storage.allowed_document_extensions {
            if !is_supported_document_extension(extension) {
                return Err(ConfigError::InvalidValue {
                    field: "ALLOWED_DOCUMENT_EXTENSIONS",
                    value: extension.clone(),
                });
            }
        }

        if self.evaluation.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EVALUATION_TIMEOUT_SECONDS",
                value: String::from("0"),
            });
        }

        if self.evaluation.max_criteria == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_EVALUATION_CRITERIA",
                value: String::from("0"),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.ai.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("AI_API_KEY"));
        }

        if self.ai.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("AI_BASE_URL"));
        }

        if self.datalab.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("DATALAB_API_KEY"));
        }

        if !self.s3.has_credentials() {
            return Err(ConfigError::MissingSecret("S3_ACCESS_KEY/S3_SECRET_KEY"));
        }

        Ok(())
    }
}
