use std::fmt::Write;

use crate::search::RetrievedChunk;

/// Sentence the model must reply with when the context does not answer the question
pub const REFUSAL: &str = "I cannot find this in the repository.";

const RULE: &str = "================================================================================";

/// Prompt rendering options
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptOptions {
    /// Prefix every context line with its 1-based line number in the source file
    pub line_numbers: bool,
}

/// Chunks of one file, in retrieval order
struct FileGroup<'a> {
    path: &'a str,
    chunks: Vec<&'a RetrievedChunk>,
}

/// Group by file, ordered by the first appearance of each file in the ranking
fn group_by_file(chunks: &[RetrievedChunk]) -> Vec<FileGroup<'_>> {
    let mut groups: Vec<FileGroup<'_>> = Vec::new();
    for chunk in chunks {
        match groups.iter_mut().find(|g| g.path == chunk.file) {
            Some(group) => group.chunks.push(chunk),
            None => groups.push(FileGroup {
                path: &chunk.file,
                chunks: vec![chunk],
            }),
        }
    }
    groups
}

fn render_chunk(out: &mut String, chunk: &RetrievedChunk, options: PromptOptions) {
    let last_line = chunk.start_line + chunk.content.lines().count().saturating_sub(1);
    let _ = writeln!(
        out,
        "--- chunk {} (lines {}-{}, score {:.3}) ---",
        chunk.chunk_index + 1,
        chunk.start_line,
        last_line,
        chunk.score
    );
    if options.line_numbers {
        for (offset, line) in chunk.content.lines().enumerate() {
            let _ = writeln!(out, "{:>5} | {}", chunk.start_line + offset, line);
        }
    } else {
        out.push_str(&chunk.content);
        out.push('\n');
    }
}

/// Render the single grounding prompt sent to the inference service
pub fn compose_prompt(question: &str, chunks: &[RetrievedChunk], options: PromptOptions) -> String {
    let mut context = String::new();
    for group in group_by_file(chunks) {
        let _ = writeln!(context, "FILE: {}", group.path);
        for chunk in group.chunks {
            render_chunk(&mut context, chunk, options);
        }
        context.push('\n');
    }

    format!(
        "You are a senior software engineer assistant.\n\
         Answer ONLY using the context from the repository.\n\
         \n\
         If the answer is not found in the provided context, reply exactly:\n\
         \"{refusal}\"\n\
         \n\
         {rule}\n\
         USER QUESTION:\n\
         {question}\n\
         {rule}\n\
         \n\
         CONTEXT FROM REPOSITORY:\n\
         {context}\
         {rule}\n\
         Provide a concise, accurate, and technically correct response.\n\
         Use bullet points and code blocks when helpful.\n",
        refusal = REFUSAL,
        rule = RULE,
        question = question.trim(),
        context = context,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(file: &str, index: usize, start_line: usize, content: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            file: file.to_string(),
            content: content.to_string(),
            score,
            vector_score: score,
            lexical_score: 0.0,
            start_line,
            chunk_index: index,
            model: "nomic-embed-text".to_string(),
        }
    }

    #[test]
    fn test_groups_chunks_by_file_in_rank_order() {
        let chunks = vec![
            chunk("src/auth.rs", 2, 40, "fn login() {}", 0.9),
            chunk("README.md", 0, 1, "# Hello", 0.8),
            chunk("src/auth.rs", 0, 1, "use crate::db;", 0.7),
        ];
        let prompt = compose_prompt("explain login", &chunks, PromptOptions::default());

        let auth = prompt.find("FILE: src/auth.rs").unwrap();
        let readme = prompt.find("FILE: README.md").unwrap();
        assert!(auth < readme);
        assert_eq!(prompt.matches("FILE: src/auth.rs").count(), 1);

        // both auth chunks sit under the auth header, before the README header
        let second_auth_chunk = prompt.find("use crate::db;").unwrap();
        assert!(second_auth_chunk < readme);
        assert!(prompt.contains("score 0.900"));
        assert!(prompt.contains("score 0.700"));
    }

    #[test]
    fn test_instruction_frame() {
        let prompt = compose_prompt("  what is this?  ", &[], PromptOptions::default());
        assert!(prompt.contains(&format!("\"{}\"", REFUSAL)));
        assert!(prompt.contains("USER QUESTION:\nwhat is this?\n"));
        assert!(prompt.contains("Answer ONLY using the context"));
        assert!(prompt.contains("bullet points and code blocks"));
    }

    #[test]
    fn test_line_numbers_are_absolute() {
        let chunks = vec![chunk("src/lib.rs", 1, 10, "fn a() {\n    1\n}", 0.5)];

        let numbered = compose_prompt("q", &chunks, PromptOptions { line_numbers: true });
        assert!(numbered.contains("   10 | fn a() {"));
        assert!(numbered.contains("   12 | }"));
        assert!(numbered.contains("lines 10-12"));

        let plain = compose_prompt("q", &chunks, PromptOptions::default());
        assert!(!plain.contains("   10 | "));
        assert!(plain.contains("fn a() {\n    1\n}\n"));
    }
}
