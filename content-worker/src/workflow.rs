use std::sync::Arc;

use anyhow::bail;
use rabbitmq::Processor;

use crate::config::Config;
use crate::processors::{
    ClassifierProcessor, CrawlerProcessor, EmbeddingProcessor, NotifierProcessor,
    SummarizerProcessor, TranscriberProcessor,
};

/// Static queue wiring of one stage. The worker kernel declares and binds
/// exactly these queues and refuses publishes outside `output_queues`.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub name: &'static str,
    pub input_queue: String,
    pub output_queues: Vec<String>,
    pub error_queue: String,
}

pub const STAGE_NAMES: [&str; 6] = [
    "classifier",
    "crawler",
    "transcriber",
    "summarizer",
    "embedding",
    "notifier",
];

/// The pipeline graph, expressed purely through queue names.
pub fn stage_config(config: &Config, name: &str) -> Option<ProcessorConfig> {
    let stage = match name {
        "classifier" => ProcessorConfig {
            name: "classifier",
            input_queue: config.classify_queue.clone(),
            output_queues: vec![config.crawl_queue.clone(), config.transcribe_queue.clone()],
            error_queue: config.error_queue.clone(),
        },
        "crawler" => ProcessorConfig {
            name: "crawler",
            input_queue: config.crawl_queue.clone(),
            output_queues: vec![config.summary_queue.clone()],
            error_queue: config.error_queue.clone(),
        },
        "transcriber" => ProcessorConfig {
            name: "transcriber",
            input_queue: config.transcribe_queue.clone(),
            output_queues: vec![config.summary_queue.clone()],
            error_queue: config.error_queue.clone(),
        },
        "summarizer" => ProcessorConfig {
            name: "summarizer",
            input_queue: config.summary_queue.clone(),
            output_queues: vec![config.embedding_queue.clone()],
            error_queue: config.error_queue.clone(),
        },
        "embedding" => ProcessorConfig {
            name: "embedding",
            input_queue: config.embedding_queue.clone(),
            output_queues: vec![],
            error_queue: config.error_queue.clone(),
        },
        "notifier" => ProcessorConfig {
            name: "notifier",
            input_queue: config.notify_queue.clone(),
            output_queues: vec![],
            error_queue: config.error_queue.clone(),
        },
        _ => return None,
    };
    Some(stage)
}

/// Builds the stage selected for this process. Unknown names are a fatal
/// configuration error.
pub fn create_processor(config: Arc<Config>, name: &str) -> anyhow::Result<Arc<dyn Processor>> {
    let Some(queues) = stage_config(&config, name) else {
        bail!(
            "unknown stage '{}'; expected one of {}",
            name,
            STAGE_NAMES.join(", ")
        );
    };

    let processor: Arc<dyn Processor> = match queues.name {
        "classifier" => Arc::new(ClassifierProcessor::new(config, queues)?),
        "crawler" => Arc::new(CrawlerProcessor::new(config, queues)?),
        "transcriber" => Arc::new(TranscriberProcessor::new(config, queues)?),
        "summarizer" => Arc::new(SummarizerProcessor::new(config, queues)?),
        "embedding" => Arc::new(EmbeddingProcessor::new(config, queues)?),
        "notifier" => Arc::new(NotifierProcessor::new(config, queues)?),
        _ => unreachable!("stage_config only returns known stages"),
    };
    Ok(processor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_stage_has_a_config() {
        let config = Config::from_env();
        for name in STAGE_NAMES {
            assert!(stage_config(&config, name).is_some(), "missing {}", name);
        }
        assert!(stage_config(&config, "no-such-stage").is_none());
    }

    #[test]
    fn test_outputs_stay_inside_the_declared_graph() {
        let config = Config::from_env();
        let known: HashSet<&str> = [
            config.classify_queue.as_str(),
            config.transcribe_queue.as_str(),
            config.crawl_queue.as_str(),
            config.summary_queue.as_str(),
            config.embedding_queue.as_str(),
            config.notify_queue.as_str(),
        ]
        .into();

        for name in STAGE_NAMES {
            let stage = stage_config(&config, name).unwrap();
            for output in &stage.output_queues {
                assert!(
                    known.contains(output.as_str()),
                    "{} routes outside the graph: {}",
                    name,
                    output
                );
            }
            // The error queue is shared and never doubles as an output.
            assert!(!stage.output_queues.contains(&stage.error_queue));
        }
    }

    #[test]
    fn test_terminal_stages_have_no_outputs() {
        let config = Config::from_env();
        assert!(stage_config(&config, "embedding")
            .unwrap()
            .output_queues
            .is_empty());
        assert!(stage_config(&config, "notifier")
            .unwrap()
            .output_queues
            .is_empty());
    }

    #[test]
    fn test_graph_edges_match_the_pipeline() {
        let config = Config::from_env();
        let classifier = stage_config(&config, "classifier").unwrap();
        assert_eq!(classifier.input_queue, config.classify_queue);
        assert!(classifier.output_queues.contains(&config.crawl_queue));
        assert!(classifier.output_queues.contains(&config.transcribe_queue));

        let crawler = stage_config(&config, "crawler").unwrap();
        assert_eq!(crawler.output_queues, vec![config.summary_queue.clone()]);

        let summarizer = stage_config(&config, "summarizer").unwrap();
        assert_eq!(
            summarizer.output_queues,
            vec![config.embedding_queue.clone()]
        );
    }
}
