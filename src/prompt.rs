/// 第二阶段的提示词：让模型只保留与原问题相关的内容，压缩并校正第一次的回答。
///
/// 纯函数：相同的输入永远得到逐字节相同的输出。
pub fn refinement_prompt(original_prompt: &str, initial_answer: &str) -> String {
    format!(
        "Please rewrite the following response, retaining only context relevant to the \
         original user prompt and ensuring accuracy. Remove any unnecessary information \
         and make it concise and accurate:\n\
         \n\
         Original prompt: \"{original_prompt}\"\n\
         Response to refine: \"{initial_answer}\""
    )
}
