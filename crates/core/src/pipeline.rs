use crate::config::Settings;
use crate::error::ReviewError;
use crate::llm::azure_openai::AzureOpenAiClient;
use crate::llm::usage::{CostEstimate, Pricing};
use crate::llm::{GenerateInput, LlmClient};
use crate::notify::acs::AcsEmailClient;
use crate::notify::{recipients_from, EmailMessage, Notifier, Recipient};
use crate::portfolio::{self, PortfolioSource};
use crate::report::{self, RenderedReport, Report};
use chrono::NaiveDate;
use std::path::PathBuf;

/// Long-lived collaborators, built once per process and shared by every invocation.
pub struct Clients {
    pub source: Box<dyn PortfolioSource>,
    pub llm: Box<dyn LlmClient>,
    /// Absent in dry-run mode.
    pub notifier: Option<Box<dyn Notifier>>,
}

impl Clients {
    pub fn from_settings(
        settings: &Settings,
        portfolio_override: Option<PathBuf>,
        dry_run: bool,
    ) -> anyhow::Result<Self> {
        let source = portfolio::source_from_settings(settings, portfolio_override)?;
        let llm: Box<dyn LlmClient> = Box::new(AzureOpenAiClient::from_settings(settings)?);
        let notifier: Option<Box<dyn Notifier>> = if dry_run {
            None
        } else {
            Some(Box::new(AcsEmailClient::from_settings(settings)?))
        };
        Ok(Self {
            source,
            llm,
            notifier,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub recipients: Vec<Recipient>,
    pub run_mode: String,
    pub pricing: Pricing,
    pub focus: String,
    pub new_ideas: u32,
    pub dry_run: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings, dry_run: bool) -> anyhow::Result<Self> {
        let recipients = if dry_run {
            recipients_from(&settings.receiver_emails, settings.receiver_display_name.as_deref())
        } else {
            recipients_from(
                settings.require_receiver_emails()?,
                settings.receiver_display_name.as_deref(),
            )
        };

        Ok(Self {
            recipients,
            run_mode: settings.run_mode.as_str().to_string(),
            pricing: Pricing {
                input_per_1k: settings.price_input_per_1k,
                output_per_1k: settings.price_output_per_1k,
            },
            focus: settings.review_focus.clone(),
            new_ideas: settings.review_new_ideas,
            dry_run,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub as_of_date: NaiveDate,
    pub holdings: usize,
    pub cost: Option<CostEstimate>,
    pub email_sent: bool,
    pub report: Report,
    pub rendered: RenderedReport,
}

/// load -> generate -> format -> notify. A failing stage stops the run; nothing after it executes.
pub struct ReviewPipeline<'a> {
    source: &'a dyn PortfolioSource,
    llm: &'a dyn LlmClient,
    notifier: Option<&'a dyn Notifier>,
    options: &'a PipelineOptions,
}

impl<'a> ReviewPipeline<'a> {
    pub fn new(
        source: &'a dyn PortfolioSource,
        llm: &'a dyn LlmClient,
        notifier: Option<&'a dyn Notifier>,
        options: &'a PipelineOptions,
    ) -> Self {
        Self {
            source,
            llm,
            notifier,
            options,
        }
    }

    pub fn from_clients(clients: &'a Clients, options: &'a PipelineOptions) -> Self {
        Self::new(
            clients.source.as_ref(),
            clients.llm.as_ref(),
            clients.notifier.as_deref(),
            options,
        )
    }

    pub async fn run(&self, as_of_date: NaiveDate) -> anyhow::Result<RunSummary> {
        let notifier = match (self.options.dry_run, self.notifier) {
            (true, _) => None,
            (false, Some(n)) => Some(n),
            (false, None) => {
                return Err(
                    ReviewError::configuration("no notifier configured outside dry-run").into(),
                )
            }
        };
        if notifier.is_some() && self.options.recipients.is_empty() {
            return Err(ReviewError::configuration("no email recipients configured").into());
        }

        let portfolio = portfolio::load_portfolio(self.source).await?;
        let holdings = portfolio.len();

        let input = GenerateInput::try_new(
            as_of_date,
            portfolio,
            self.options.focus.clone(),
            self.options.new_ideas,
        )?;
        let generation = self.llm.generate_review(input).await?;

        let cost = generation.usage.estimate(self.options.pricing);
        tracing::info!(
            %as_of_date,
            provider = self.llm.provider(),
            prompt_tokens = cost.usage.prompt_tokens,
            completion_tokens = cost.usage.completion_tokens,
            total_cost = cost.total_usd,
            "model usage"
        );

        let report = Report::from_review(
            as_of_date,
            generation.review,
            Some(cost),
            self.options.run_mode.clone(),
        );
        let rendered = report::render(&report);

        let email_sent = match notifier {
            Some(notifier) => {
                let message = EmailMessage {
                    subject: rendered.subject.clone(),
                    plain_text: rendered.text.clone(),
                    html: rendered.html.clone(),
                    to: self.options.recipients.clone(),
                };
                notifier.send(&message).await?;
                tracing::info!(
                    %as_of_date,
                    channel = notifier.channel(),
                    recipients = message.to.len(),
                    "daily review sent"
                );
                true
            }
            None => {
                tracing::info!(%as_of_date, dry_run = true, "daily review rendered; email skipped");
                false
            }
        };

        Ok(RunSummary {
            as_of_date,
            holdings,
            cost: Some(cost),
            email_sent,
            report,
            rendered,
        })
    }
}
