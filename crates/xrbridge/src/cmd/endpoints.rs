use xrbridge_reqrep::ENDPOINTS;

use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_endpoints, OutputFormat};

pub fn run(format: OutputFormat) -> CliResult<i32> {
    print_endpoints(ENDPOINTS, format);
    Ok(SUCCESS)
}
