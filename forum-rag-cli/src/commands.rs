//! Subcommand handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use forum_rag::category::{self, CategorySet, Classifier};
use forum_rag::openai::{OpenAIChatGenerator, OpenAIConfig, OpenAIEmbeddingProvider};
use forum_rag::{PostRefiner, RagConfig, RagPipeline, SimilarityIndex, TextGenerator, records};
use tracing::info;

fn openai_config() -> Result<OpenAIConfig> {
    OpenAIConfig::from_env().context("OpenAI credentials are not configured")
}

fn chat_generator() -> Result<Arc<dyn TextGenerator>> {
    Ok(Arc::new(OpenAIChatGenerator::new(openai_config()?)?))
}

fn pipeline(config: RagConfig, with_generator: bool) -> Result<RagPipeline> {
    let openai = openai_config()?;
    let mut builder = RagPipeline::builder()
        .config(config)
        .embedding_provider(Arc::new(OpenAIEmbeddingProvider::new(openai.clone())?));
    if with_generator {
        builder = builder.text_generator(Arc::new(OpenAIChatGenerator::new(openai)?));
    }
    Ok(builder.build()?)
}

fn load_index(path: &Path, max_tokens: usize) -> Result<SimilarityIndex> {
    let documents = records::read_documents(path)
        .with_context(|| format!("failed to load index from {}", path.display()))?;
    let index = SimilarityIndex::from_documents_with_max_tokens(documents, max_tokens)
        .with_context(|| format!("invalid index in {}", path.display()))?;
    Ok(index)
}

pub async fn refine(
    input: &Path,
    output: &Path,
    batch_size: usize,
    config: RagConfig,
) -> Result<()> {
    let posts = records::read_raw_posts(input)?;
    if posts.is_empty() {
        bail!("no posts found in {}", input.display());
    }

    let refiner = PostRefiner::new(chat_generator()?, config).with_batch_size(batch_size);
    let refined = refiner.refine(&posts).await?;
    let rows: Vec<_> = refined.into_iter().map(|post| post.into_record()).collect();
    records::write_records(output, &rows)?;

    info!(input = posts.len(), output = rows.len(), "refine complete");
    Ok(())
}

pub async fn categories(
    input: &Path,
    output: &Path,
    count: usize,
    config: RagConfig,
) -> Result<()> {
    let rows = records::read_records(input)?;
    let vocabulary = category::keyword_vocabulary(&rows);
    info!(records = rows.len(), keywords = vocabulary.len(), "collected keyword vocabulary");

    let generator = chat_generator()?;
    let set =
        category::generate_categories(&vocabulary, count, generator.as_ref(), &config).await?;
    set.save(output)?;

    for entry in &set.categories {
        println!("{}: {}", entry.name, entry.description);
    }
    Ok(())
}

pub async fn classify(
    input: &Path,
    categories: &Path,
    output: &Path,
    config: RagConfig,
) -> Result<()> {
    let set = CategorySet::load(categories)?;
    let mut rows = records::read_records(input)?;

    let classifier = Classifier::new(chat_generator()?, config);
    let classified = classifier.classify_all(&mut rows, &set).await;
    records::write_records(output, &rows)?;

    info!(total = rows.len(), classified, "classify complete");
    Ok(())
}

pub async fn embed(input: &Path, output: &Path, config: RagConfig) -> Result<()> {
    let rows = records::read_records(input)?;
    let pipeline = pipeline(config, false)?;

    let index = pipeline.build_index(&rows).await?;
    records::write_documents(output, index.documents())?;

    info!(
        records = rows.len(),
        indexed = index.len(),
        dimensions = index.dimensions().unwrap_or(0),
        "embed complete"
    );
    Ok(())
}

pub async fn search(index: &Path, query: &str, json: bool, config: RagConfig) -> Result<()> {
    let index = load_index(index, config.max_tokens)?;
    let pipeline = pipeline(config, false)?;
    let top_k = pipeline.config().top_k;

    for result in pipeline.query(&index, query, top_k).await? {
        if json {
            let line = serde_json::json!({
                "id": result.document.id,
                "score": result.score,
                "content": result.document.content,
                "comments": result.document.comments,
                "metadata": result.document.metadata,
            });
            println!("{line}");
        } else {
            println!("{:.4}\t{}\t{}", result.score, result.document.id, result.document.content);
        }
    }
    Ok(())
}

pub async fn answer(index: &Path, question: &str, config: RagConfig) -> Result<()> {
    let index = load_index(index, config.max_tokens)?;
    let pipeline = pipeline(config, true)?;

    let answer = pipeline.answer(&index, question).await?;
    println!("{answer}");
    Ok(())
}
