use katex::{OptsBuilder, OutputType};
use mdv_render::{AdapterError, MathMode, MathRenderer};

/// KaTeX typesetting.
///
/// Invalid input is reported as an error rather than rendered in red, so the
/// unit gets the pipeline's error markup.
#[derive(Debug, Default, Clone, Copy)]
pub struct KatexMath;

impl MathRenderer for KatexMath {
    fn render(&self, source: &str, mode: MathMode) -> Result<String, AdapterError> {
        let mut builder = OptsBuilder::default();
        builder.display_mode(mode == MathMode::Display);
        builder.output_type(OutputType::Html);
        builder.throw_on_error(true);

        let opts = builder
            .build()
            .map_err(|e| AdapterError::Math(format!("failed to build KaTeX options: {e}")))?;

        katex::render_with_opts(source, opts).map_err(|e| AdapterError::Math(e.to_string()))
    }
}
